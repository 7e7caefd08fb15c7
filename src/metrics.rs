use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Service-level counters exposed on /metrics.
#[derive(Debug)]
pub struct Metrics {
    pub evals_total: AtomicU64,
    pub evals_active: AtomicU64,
    pub evals_passed: AtomicU64,
    pub evals_failed: AtomicU64,
    pub evals_errored: AtomicU64,
    pub duration_sum_ms: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            evals_total: AtomicU64::new(0),
            evals_active: AtomicU64::new(0),
            evals_passed: AtomicU64::new(0),
            evals_failed: AtomicU64::new(0),
            evals_errored: AtomicU64::new(0),
            duration_sum_ms: AtomicU64::new(0),
        })
    }

    pub fn start_eval(&self) {
        self.evals_total.fetch_add(1, Ordering::Relaxed);
        self.evals_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish_eval(&self, status: crate::evaluation::ResultStatus, duration_ms: u64) {
        self.evals_active.fetch_sub(1, Ordering::Relaxed);
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        match status {
            crate::evaluation::ResultStatus::Passed => {
                self.evals_passed.fetch_add(1, Ordering::Relaxed);
            }
            crate::evaluation::ResultStatus::Failed => {
                self.evals_failed.fetch_add(1, Ordering::Relaxed);
            }
            crate::evaluation::ResultStatus::Error => {
                self.evals_errored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn render_prometheus(&self) -> String {
        let total = self.evals_total.load(Ordering::Relaxed);
        let active = self.evals_active.load(Ordering::Relaxed);
        let passed = self.evals_passed.load(Ordering::Relaxed);
        let failed = self.evals_failed.load(Ordering::Relaxed);
        let errored = self.evals_errored.load(Ordering::Relaxed);
        let dur_sum = self.duration_sum_ms.load(Ordering::Relaxed);

        format!(
            "# HELP req2run_evals_total Total evaluations submitted.\n\
             # TYPE req2run_evals_total counter\n\
             req2run_evals_total {}\n\
             # HELP req2run_evals_active Currently running evaluations.\n\
             # TYPE req2run_evals_active gauge\n\
             req2run_evals_active {}\n\
             # HELP req2run_evals_passed Evaluations with status=passed.\n\
             # TYPE req2run_evals_passed counter\n\
             req2run_evals_passed {}\n\
             # HELP req2run_evals_failed Evaluations with status=failed.\n\
             # TYPE req2run_evals_failed counter\n\
             req2run_evals_failed {}\n\
             # HELP req2run_evals_errored Evaluations with status=error.\n\
             # TYPE req2run_evals_errored counter\n\
             req2run_evals_errored {}\n\
             # HELP req2run_duration_ms_sum Sum of evaluation durations in ms.\n\
             # TYPE req2run_duration_ms_sum counter\n\
             req2run_duration_ms_sum {}\n",
            total, active, passed, failed, errored, dur_sum
        )
    }
}
