use std::time::Duration;

use crate::trace::Trace;

/// One send in a cycle: wait `delta`, then send `payload_bytes`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub delta: f64,
    pub payload_bytes: usize,
}

impl Step {
    /// The wait before this send. Gaps too long for a `Duration` saturate.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delta.max(0.0)).unwrap_or(Duration::MAX)
    }
}

/// A rotation of a trace that can be replayed back to back forever.
///
/// The first step always has a zero delta. The gap between the last and the
/// first step of consecutive cycles is the trace's own wraparound gap.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSchedule {
    steps: Vec<Step>,
}

impl CycleSchedule {
    /// Compiles `trace` starting at sample `start_index` (taken modulo the
    /// trace length).
    pub fn compile(trace: &Trace, start_index: usize) -> Self {
        let points = trace.points();
        let n = points.len();
        if n == 0 {
            return CycleSchedule { steps: Vec::new() };
        }
        let start = start_index % n;
        let base = points[start].offset;
        let period = trace.period();

        let mut steps = Vec::with_capacity(n);
        let mut prev = 0.0;
        for k in 0..n {
            let i = (start + k) % n;
            let rel = if i >= start {
                points[i].offset - base
            } else {
                points[i].offset - base + period
            };
            let delta = if k == 0 { 0.0 } else { (rel - prev).max(0.0) };
            steps.push(Step {
                delta,
                payload_bytes: points[i].payload_bytes,
            });
            prev = rel;
        }
        CycleSchedule { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all deltas, i.e. the time covered by one pass.
    pub fn cycle_time(&self) -> f64 {
        self.steps.iter().map(|s| s.delta).sum()
    }

    /// Walks the steps forever, wrapping at the end.
    pub fn cycle(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().cycle()
    }
}

/// Start sample for flow `flow_idx` of `flow_count` flows on a trace of
/// `trace_len` samples. Staggered evenly when multiplexing, otherwise 0.
pub fn start_index(flow_idx: usize, flow_count: usize, trace_len: usize, multiplex: bool) -> usize {
    if !multiplex || trace_len == 0 {
        return 0;
    }
    (flow_idx * trace_len / flow_count.max(1)) % trace_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TracePoint;

    fn trace(rows: &[(f64, f64)]) -> Trace {
        Trace::from_points(
            rows.iter()
                .filter_map(|&(t, s)| TracePoint::new(t, s))
                .collect(),
        )
        .unwrap()
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn rotation_from_second_sample() {
        let t = trace(&[(0.0, 100.0), (0.5, 200.0), (1.0, 150.0)]);
        let sched = CycleSchedule::compile(&t, 1);
        let deltas: Vec<f64> = sched.steps().iter().map(|s| s.delta).collect();
        let sizes: Vec<usize> = sched.steps().iter().map(|s| s.payload_bytes).collect();
        assert!(close(&deltas, &[0.0, 0.5, 1.0]), "{:?}", deltas);
        assert_eq!(sizes, vec![200, 150, 100]);
    }

    #[test]
    fn start_at_zero_keeps_original_gaps() {
        let t = trace(&[(1.0, 10.0), (1.25, 20.0), (2.0, 30.0), (4.0, 40.0)]);
        let sched = CycleSchedule::compile(&t, 0);
        let deltas: Vec<f64> = sched.steps().iter().map(|s| s.delta).collect();
        assert!(close(&deltas, &[0.0, 0.25, 0.75, 2.0]));
        assert!((sched.cycle_time() - t.period()).abs() < 1e-9);
    }

    #[test]
    fn every_rotation_is_a_permutation_with_zero_first_delta() {
        let t = trace(&[(0.0, 1.0), (0.1, 2.0), (0.3, 3.0), (0.35, 4.0), (0.9, 5.0)]);
        let sizes: Vec<usize> = t.points().iter().map(|p| p.payload_bytes).collect();
        for start in 0..t.len() {
            let sched = CycleSchedule::compile(&t, start);
            assert_eq!(sched.len(), t.len());
            assert_eq!(sched.steps()[0].delta, 0.0);
            assert!(sched.steps().iter().all(|s| s.delta >= 0.0));
            let got: Vec<usize> = sched.steps().iter().map(|s| s.payload_bytes).collect();
            let mut expected = sizes.clone();
            expected.rotate_left(start);
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn single_point_trace() {
        let t = trace(&[(5.0, 42.0)]);
        let sched = CycleSchedule::compile(&t, 0);
        assert_eq!(sched.steps(), &[Step { delta: 0.0, payload_bytes: 42 }]);
    }

    #[test]
    fn out_of_range_start_wraps() {
        let t = trace(&[(0.0, 1.0), (1.0, 2.0)]);
        assert_eq!(CycleSchedule::compile(&t, 3), CycleSchedule::compile(&t, 1));
    }

    #[test]
    fn staggered_start_indices() {
        let got: Vec<usize> = (0..4).map(|i| start_index(i, 4, 10, true)).collect();
        assert_eq!(got, vec![0, 2, 5, 7]);
        assert!((0..4).all(|i| start_index(i, 4, 10, false) == 0));
        assert_eq!(start_index(0, 1, 7, true), 0);
    }

    #[test]
    fn huge_gap_saturates_delay() {
        let t = trace(&[(0.0, 10.0), (1e20, 20.0)]);
        let sched = CycleSchedule::compile(&t, 0);
        assert_eq!(sched.steps()[1].delay(), Duration::MAX);
        assert_eq!(sched.steps()[0].delay(), Duration::ZERO);
    }

    #[test]
    fn cycle_wraps() {
        let t = trace(&[(0.0, 1.0), (1.0, 2.0)]);
        let sched = CycleSchedule::compile(&t, 0);
        let sizes: Vec<usize> = sched.cycle().take(5).map(|s| s.payload_bytes).collect();
        assert_eq!(sizes, vec![1, 2, 1, 2, 1]);
    }
}
