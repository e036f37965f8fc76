use chess_analysis_core::{
    AnalysisError, AnalysisPool, AnalysisResult, Analyzer, AnalyzerFactory, BackendKind,
    CandidateMove, JobState, OpeningBook, Position, PovScore, ResultSource, Score,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Shared instrumentation for the scripted backend.
#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    analyzed: AtomicUsize,
    released: AtomicUsize,
    gate_closed: AtomicBool,
}

impl Counters {
    fn open_gate(&self) {
        self.gate_closed.store(false, Ordering::SeqCst);
    }
}

struct ScriptedAnalyzer {
    counters: Arc<Counters>,
    fail: bool,
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(
        &mut self,
        position: &Position,
        _: Duration,
        breadth: usize,
    ) -> chess_analysis_core::Result<AnalysisResult> {
        self.counters.analyzed.fetch_add(1, Ordering::SeqCst);
        while self.counters.gate_closed.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(2));
        }
        if self.fail {
            return Err(AnalysisError::BackendProtocol("engine crashed".to_string()));
        }
        if position.as_str() == "h2h4" {
            panic!("analyzer bug");
        }

        let turn = position.side_to_move();
        let candidates = (0..breadth)
            .map(|i| CandidateMove {
                uci: format!("a{}a{}", 2 + i, 3 + i),
                score: Some(PovScore::new(turn, Score::Centipawns(50 - i as i32))),
                pv: vec![format!("a{}a{}", 2 + i, 3 + i)],
                depth: Some(12),
            })
            .collect();
        Ok(AnalysisResult {
            candidates,
            source: ResultSource::Engine(BackendKind::Classical),
        })
    }
}

impl Drop for ScriptedAnalyzer {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedFactory {
    counters: Arc<Counters>,
}

impl AnalyzerFactory for ScriptedFactory {
    fn create(
        &self,
        kind: BackendKind,
    ) -> chess_analysis_core::Result<Box<dyn Analyzer + Send>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedAnalyzer {
            counters: Arc::clone(&self.counters),
            fail: kind == BackendKind::Neural,
        }))
    }
}

fn pool_with(
    workers: usize,
    book: Option<OpeningBook>,
) -> (AnalysisPool<ScriptedFactory>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = ScriptedFactory {
        counters: Arc::clone(&counters),
    };
    (AnalysisPool::new(workers, book, factory).unwrap(), counters)
}

const BUDGET: Duration = Duration::from_millis(10);

#[test]
fn test_book_hits_never_construct_a_backend() {
    let book = OpeningBook::from_lines([
        "e2e4 e7e5 g1f3 b8c6",
        "e2e4 e7e5 f1c4",
        "e2e4 c7c5 g1f3",
        "d2d4 d7d5",
    ]);
    let (pool, counters) = pool_with(2, Some(book));

    for moves in ["", "e2e4", "e2e4 e7e5", "e2e4 c7c5", "d2d4"] {
        for kind in [BackendKind::Classical, BackendKind::Neural] {
            let result = pool
                .submit_and_await(&Position::new(moves), kind, BUDGET, 3)
                .unwrap();
            assert!(result.is_book());
            assert!(!result.is_empty());
            assert!(result.len() <= 3);
        }
    }

    let result = pool
        .submit_and_await(&Position::new("e2e4 e7e5"), BackendKind::Classical, BUDGET, 1)
        .unwrap();
    assert_eq!(result.moves(), vec!["f1c4"]);
    assert_eq!(counters.created.load(Ordering::SeqCst), 0);

    // Off-book falls through to the backend
    let result = pool
        .submit_and_await(&Position::new("g1f3"), BackendKind::Classical, BUDGET, 2)
        .unwrap();
    assert!(!result.is_book());
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_submissions_share_one_job() {
    let (pool, counters) = pool_with(4, None);
    counters.gate_closed.store(true, Ordering::SeqCst);
    let pool = Arc::new(pool);

    let position = Position::new("e2e4 e7e5 g1f3");
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            let position = position.clone();
            thread::spawn(move || {
                barrier.wait();
                pool.submit(&position, BackendKind::Classical, BUDGET, 2).unwrap()
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(pool.pending_jobs(), 1);

    counters.open_gate();
    let result = pool.await_result(&ids[0]).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(counters.analyzed.load(Ordering::SeqCst), 1);

    // Every other holder of the same id finds the job gone
    assert!(matches!(pool.await_result(&ids[1]), Err(AnalysisError::JobNotFound(_))));
}

#[test]
fn test_budget_is_not_part_of_the_key() {
    let (pool, counters) = pool_with(2, None);
    counters.gate_closed.store(true, Ordering::SeqCst);
    let position = Position::new("c2c4");

    let short = Duration::from_millis(5);
    let fast = pool.submit(&position, BackendKind::Classical, short, 1).unwrap();
    let slow = pool
        .submit(&position, BackendKind::Classical, Duration::from_secs(5), 1)
        .unwrap();
    let wider = pool.submit(&position, BackendKind::Classical, short, 2).unwrap();
    let neural = pool.submit(&position, BackendKind::Neural, short, 1).unwrap();

    assert_eq!(fast, slow);
    assert_ne!(fast, wider);
    assert_ne!(fast, neural);
    assert_eq!(pool.pending_jobs(), 3);

    counters.open_gate();
    pool.await_result(&fast).unwrap();
    pool.await_result(&wider).unwrap();
    assert!(pool.await_result(&neural).is_err());
}

#[test]
fn test_double_await_is_not_found() {
    let (pool, _) = pool_with(1, None);
    let id = pool.submit(&Position::start(), BackendKind::Classical, BUDGET, 1).unwrap();

    assert!(pool.await_result(&id).is_ok());
    match pool.await_result(&id) {
        Err(AnalysisError::JobNotFound(job)) => assert_eq!(job, id.to_string()),
        other => panic!("expected JobNotFound, got {:?}", other),
    }
}

#[test]
fn test_backend_failure_reaches_the_awaiting_caller() {
    let (pool, counters) = pool_with(2, None);

    let error = pool
        .submit_and_await(&Position::new("e2e4"), BackendKind::Neural, BUDGET, 1)
        .unwrap_err();
    assert!(matches!(error, AnalysisError::BackendProtocol(_)));

    let error = pool
        .submit_and_await(&Position::new("h2h4"), BackendKind::Classical, BUDGET, 1)
        .unwrap_err();
    assert!(matches!(error, AnalysisError::WorkerPanicked(_)));

    // Analyzers are released on every path
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    assert_eq!(counters.released.load(Ordering::SeqCst), 2);

    // Failures are not retried and do not poison the pool
    assert!(pool
        .submit_and_await(&Position::new("e2e4"), BackendKind::Classical, BUDGET, 1)
        .is_ok());
}

#[test]
fn test_job_states() {
    let (pool, counters) = pool_with(1, None);
    counters.gate_closed.store(true, Ordering::SeqCst);

    let running = pool
        .submit(&Position::new("e2e4"), BackendKind::Classical, BUDGET, 1)
        .unwrap();
    let queued = pool
        .submit(&Position::new("d2d4"), BackendKind::Classical, BUDGET, 1)
        .unwrap();

    while counters.analyzed.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(pool.status(&running), Some(JobState::Running));
    assert_eq!(pool.status(&queued), Some(JobState::Submitted));

    counters.open_gate();
    pool.await_result(&running).unwrap();
    assert_eq!(pool.status(&running), None);

    while pool.status(&queued) != Some(JobState::Completed) {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_submit_after_shutdown() {
    let (pool, _) = pool_with(2, None);
    let id = pool.submit(&Position::start(), BackendKind::Classical, BUDGET, 1).unwrap();

    pool.shutdown();
    // Jobs accepted before shutdown still deliver
    assert!(pool.await_result(&id).is_ok());

    let error = pool
        .submit(&Position::new("e2e4"), BackendKind::Classical, BUDGET, 1)
        .unwrap_err();
    assert!(matches!(error, AnalysisError::PoolShutdown));
}

#[test]
fn test_illegal_position_fails_before_launching_a_backend() {
    let (pool, counters) = pool_with(2, None);

    for moves in ["e2e5", "e2e4 zz99", "e2e4 e2e4"] {
        let error = pool
            .submit_and_await(&Position::new(moves), BackendKind::Classical, BUDGET, 1)
            .unwrap_err();
        assert!(matches!(error, AnalysisError::InvalidPosition(_)), "{}", moves);
    }
    assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    assert_eq!(pool.pending_jobs(), 0);
}

#[test]
fn test_discarded_job_is_replaced_by_a_fresh_one() {
    let (pool, counters) = pool_with(1, None);
    counters.gate_closed.store(true, Ordering::SeqCst);
    let position = Position::new("g1f3");

    let first = pool.submit(&position, BackendKind::Classical, BUDGET, 1).unwrap();
    assert!(pool.discard(&first));
    assert!(!pool.discard(&first));
    assert_eq!(pool.pending_jobs(), 0);
    assert!(matches!(pool.await_result(&first), Err(AnalysisError::JobNotFound(_))));

    let second = pool.submit(&position, BackendKind::Classical, BUDGET, 1).unwrap();
    assert_ne!(first, second);

    counters.open_gate();
    assert_eq!(pool.await_result(&second).unwrap().len(), 1);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
}
