//! Contextual Thompson-sampling bandit over retrieval parameter arms
//!
//! Each query cluster keeps a Beta posterior per arm. Choosing parameters
//! draws one sample per arm from a snapshot of the posteriors and picks
//! the largest; feedback moves the matching posterior by one count.

use crate::analyzer::QueryIterator;
use crate::types::{BanditArm, BanditConfig};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use sibyl_core::{fnv1a_64, SibylResult, Verdict};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Source of uniform doubles in the open interval (0, 1)
///
/// Injectable so tests can replay a fixed stream; the default wraps
/// `fastrand`.
pub trait UniformSource: Send {
    fn next_f64(&mut self) -> f64;
}

/// Default uniform source
pub struct FastrandUniform {
    rng: fastrand::Rng,
}

impl FastrandUniform {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Default for FastrandUniform {
    fn default() -> Self {
        Self::new()
    }
}

impl UniformSource for FastrandUniform {
    fn next_f64(&mut self) -> f64 {
        // Clamp away from 0 so log() stays finite
        self.rng.f64().max(1e-12)
    }
}

/// Standard normal via Box-Muller
fn sample_standard_normal(u: &mut dyn UniformSource) -> f64 {
    let u1 = u.next_f64().max(1e-12);
    let u2 = u.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Gamma(shape, 1) via Marsaglia-Tsang for shape >= 1, Joehnk below
fn sample_gamma(shape: f64, u: &mut dyn UniformSource) -> f64 {
    if shape >= 1.0 {
        let d = shape - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        loop {
            let x = sample_standard_normal(u);
            let v = (1.0 + c * x).powi(3);
            if v <= 0.0 {
                continue;
            }
            let u1 = u.next_f64();
            if u1 < 1.0 - 0.0331 * x.powi(4) {
                return d * v;
            }
            if u1.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
                return d * v;
            }
        }
    } else {
        // Joehnk's method for 0 < shape < 1
        loop {
            let x = u.next_f64().powf(1.0 / shape);
            let y = u.next_f64().powf(1.0 / (1.0 - shape));
            if x + y <= 1.0 && x + y > 0.0 {
                let e = -u.next_f64().ln();
                return e * x / (x + y);
            }
        }
    }
}

/// Beta(alpha, beta) as the ratio of two Gamma draws
fn sample_beta(alpha: f64, beta: f64, u: &mut dyn UniformSource) -> f64 {
    let ga = sample_gamma(alpha, u);
    let gb = sample_gamma(beta, u);
    if ga + gb <= 0.0 {
        return 0.5;
    }
    ga / (ga + gb)
}

/// Beta posterior counts, both kept at 1 or above
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaPosterior {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Selection {
    cluster: String,
    arm_id: String,
    at: DateTime<Utc>,
}

struct BanditState {
    /// cluster id -> arm id -> posterior
    posteriors: HashMap<String, HashMap<String, BetaPosterior>>,
    /// qa id -> selection awaiting reward
    selections: LruCache<Uuid, Selection>,
}

/// Per-cluster Thompson sampler over the configured arms
pub struct ParamBandit {
    config: BanditConfig,
    state: Mutex<BanditState>,
    rng: Mutex<Box<dyn UniformSource>>,
}

impl ParamBandit {
    pub fn new(config: BanditConfig) -> SibylResult<Self> {
        Self::with_uniform_source(config, Box::new(FastrandUniform::new()))
    }

    /// Construct with an explicit uniform stream (tests, replay)
    pub fn with_uniform_source(
        config: BanditConfig,
        source: Box<dyn UniformSource>,
    ) -> SibylResult<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.selection_capacity.max(1)).unwrap();
        Ok(Self {
            config,
            state: Mutex::new(BanditState {
                posteriors: HashMap::new(),
                selections: LruCache::new(capacity),
            }),
            rng: Mutex::new(source),
        })
    }

    pub fn arms(&self) -> &[BanditArm] {
        &self.config.arms
    }

    /// Stable cluster id for a query: hash of the normalized text modulo
    /// the cluster count; empty queries collapse to `default`
    pub fn cluster_of(&self, query: &str) -> String {
        let normalized = QueryIterator::normalize(query);
        if normalized.is_empty() {
            return "default".to_string();
        }
        let bucket = fnv1a_64(normalized.as_bytes()) % self.config.cluster_count;
        format!("qcluster-{}", bucket)
    }

    fn idle_window(&self) -> Duration {
        Duration::seconds(self.config.selection_idle_secs as i64)
    }

    /// Drop selections that sat unrewarded past the idle window
    fn sweep_selections(state: &mut BanditState, idle: Duration) {
        let now = Utc::now();
        loop {
            let expired = match state.selections.peek_lru() {
                Some((qa_id, selection)) if now - selection.at > idle => Some(*qa_id),
                _ => None,
            };
            match expired {
                Some(qa_id) => {
                    state.selections.pop(&qa_id);
                }
                None => break,
            }
        }
    }

    /// Thompson-sample an arm for the query's cluster
    ///
    /// The posterior snapshot is taken under the lock; the Beta draws are
    /// not. When `qa_id` is given the selection is retained for reward
    /// attribution until feedback arrives or the idle window elapses.
    pub fn choose_params(&self, query: &str, qa_id: Option<Uuid>) -> (String, BanditArm) {
        let cluster = self.cluster_of(query);

        // Snapshot (alpha, beta) per arm under the lock
        let snapshot: Vec<(String, BetaPosterior)> = {
            let mut state = self.state.lock();
            let table = state.posteriors.entry(cluster.clone()).or_default();
            self.config
                .arms
                .iter()
                .map(|arm| {
                    let posterior = table.entry(arm.id.clone()).or_default();
                    (arm.id.clone(), *posterior)
                })
                .collect()
        };

        // Sample outside the state lock
        let draws: Vec<f64> = {
            let mut rng = self.rng.lock();
            snapshot
                .iter()
                .map(|(_, p)| sample_beta(p.alpha, p.beta, rng.as_mut()))
                .collect()
        };

        // Largest draw wins; ties break by arm configuration order
        let mut best = 0;
        for (idx, draw) in draws.iter().enumerate() {
            if *draw > draws[best] {
                best = idx;
            }
        }
        let arm = self.config.arms[best].clone();
        debug!(
            "Bandit chose arm '{}' for cluster '{}' (draw {:.3})",
            arm.id, cluster, draws[best]
        );

        if let Some(qa_id) = qa_id {
            let mut state = self.state.lock();
            Self::sweep_selections(&mut state, self.idle_window());
            state.selections.put(
                qa_id,
                Selection {
                    cluster: cluster.clone(),
                    arm_id: arm.id.clone(),
                    at: Utc::now(),
                },
            );
        }

        (cluster, arm)
    }

    /// Attribute a verdict to the arm that answered this QA exchange
    pub fn reward(&self, qa_id: Uuid, verdict: Verdict) {
        let mut state = self.state.lock();

        let selection = match state.selections.pop(&qa_id) {
            Some(s) => s,
            None => {
                debug!("No live selection for qa {}", qa_id);
                return;
            }
        };
        if Utc::now() - selection.at > self.idle_window() {
            debug!("Selection for qa {} expired before feedback", qa_id);
            return;
        }

        let Some(posterior) = state
            .posteriors
            .get_mut(&selection.cluster)
            .and_then(|t| t.get_mut(&selection.arm_id))
        else {
            warn!(
                "Selection references unknown arm '{}' in cluster '{}'",
                selection.arm_id, selection.cluster
            );
            return;
        };

        match verdict {
            Verdict::Up => posterior.alpha += 1.0,
            Verdict::Down => posterior.beta += 1.0,
        }
        debug!(
            "Rewarded arm '{}' in cluster '{}': Beta({}, {})",
            selection.arm_id, selection.cluster, posterior.alpha, posterior.beta
        );
    }

    /// Posterior counts for one (cluster, arm), if the cluster has been seen
    pub fn posterior(&self, cluster: &str, arm_id: &str) -> Option<BetaPosterior> {
        self.state
            .lock()
            .posteriors
            .get(cluster)
            .and_then(|t| t.get(arm_id))
            .copied()
    }

    /// Full posterior table snapshot, for inspection and the CLI
    pub fn posterior_table(&self) -> Vec<(String, Vec<(String, BetaPosterior)>)> {
        let state = self.state.lock();
        let mut clusters: Vec<_> = state.posteriors.iter().collect();
        clusters.sort_by(|a, b| a.0.cmp(b.0));
        clusters
            .into_iter()
            .map(|(cluster, table)| {
                let arms = self
                    .config
                    .arms
                    .iter()
                    .filter_map(|arm| table.get(&arm.id).map(|p| (arm.id.clone(), *p)))
                    .collect();
                (cluster.clone(), arms)
            })
            .collect()
    }

    /// Number of selections awaiting feedback
    pub fn pending_selections(&self) -> usize {
        self.state.lock().selections.len()
    }
}
