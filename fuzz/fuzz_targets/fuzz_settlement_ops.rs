#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use settle_core::{
    Error, Microtasks, Promise, Resolution, SchedulerConfig, Settler, State, all, all_settled,
    any, race,
};

const MAX_CELLS: usize = 64;

#[derive(Arbitrary, Debug)]
enum Op {
    Create,
    Fulfill { cell: u8, value: i16 },
    Reject { cell: u8 },
    Adopt { cell: u8, source: u8 },
    Thenable { cell: u8, value: i16, fail: bool },
    Then { cell: u8, fail: bool },
    Catch { cell: u8 },
    Finally { cell: u8 },
    All { cells: Vec<u8> },
    Race { cells: Vec<u8> },
    AllSettled { cells: Vec<u8> },
    Any { cells: Vec<u8> },
    Drain,
    DrainBudget(u8),
}

struct Pool {
    queue: Microtasks,
    cells: Vec<(Promise<i32, Error>, Option<Settler<i32, Error>>)>,
    /// First settled state seen for each cell.
    settled: Vec<Option<State<i32, Error>>>,
}

impl Pool {
    fn new() -> Self {
        let config = SchedulerConfig::default()
            .with_max_resolution_depth(16)
            .with_drain_budget(10_000);
        Self {
            queue: Microtasks::with_config(config),
            cells: Vec::new(),
            settled: Vec::new(),
        }
    }

    fn push(&mut self, promise: Promise<i32, Error>, settler: Option<Settler<i32, Error>>) {
        if self.cells.len() < MAX_CELLS {
            self.cells.push((promise, settler));
            self.settled.push(None);
        }
    }

    fn pick(&self, index: u8) -> Option<usize> {
        if self.cells.is_empty() {
            None
        } else {
            Some(index as usize % self.cells.len())
        }
    }

    fn settler(&self, index: u8) -> Option<Settler<i32, Error>> {
        self.pick(index).and_then(|i| self.cells[i].1.clone())
    }

    fn inputs(&self, indices: &[u8]) -> Vec<Promise<i32, Error>> {
        indices
            .iter()
            .take(8)
            .filter_map(|&i| self.pick(i))
            .map(|i| self.cells[i].0.clone())
            .collect()
    }

    /// Settled states are terminal.
    fn check(&mut self) {
        for (i, (promise, _)) in self.cells.iter().enumerate() {
            let state = promise.state();
            match &self.settled[i] {
                Some(first) => assert_eq!(&state, first, "settled cell changed state"),
                None if state.is_settled() => self.settled[i] = Some(state),
                None => {}
            }
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut pool = Pool::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Create => {
                let (promise, settler) = Promise::new(&pool.queue);
                pool.push(promise, Some(settler));
            }
            Op::Fulfill { cell, value } => {
                if let Some(s) = pool.settler(cell) {
                    s.fulfill(i32::from(value));
                }
            }
            Op::Reject { cell } => {
                if let Some(s) = pool.settler(cell) {
                    s.reject(Error::msg("fuzz"));
                }
            }
            Op::Adopt { cell, source } => {
                if let (Some(s), Some(src)) = (pool.settler(cell), pool.pick(source)) {
                    s.resolve(pool.cells[src].0.clone());
                }
            }
            Op::Thenable { cell, value, fail } => {
                if let Some(s) = pool.settler(cell) {
                    s.resolve(Resolution::thenable(move |inner: Settler<i32, Error>| {
                        inner.fulfill(i32::from(value));
                        if fail { Err(Error::msg("late")) } else { Ok(()) }
                    }));
                }
            }
            Op::Then { cell, fail } => {
                if let Some(i) = pool.pick(cell) {
                    let derived = pool.cells[i].0.then(move |v| {
                        if fail { Err(Error::msg("handler")) } else { Ok(v.wrapping_add(1)) }
                    });
                    pool.push(derived, None);
                }
            }
            Op::Catch { cell } => {
                if let Some(i) = pool.pick(cell) {
                    let derived = pool.cells[i].0.catch(|_| Ok(0));
                    pool.push(derived, None);
                }
            }
            Op::Finally { cell } => {
                if let Some(i) = pool.pick(cell) {
                    let derived = pool.cells[i].0.finally(|| Ok(()));
                    pool.push(derived, None);
                }
            }
            Op::All { cells } => {
                let derived = all(&pool.queue, pool.inputs(&cells)).then(|v| Ok(v.len() as i32));
                pool.push(derived, None);
            }
            Op::Race { cells } => {
                let derived = race(&pool.queue, pool.inputs(&cells));
                pool.push(derived, None);
            }
            Op::AllSettled { cells } => {
                let derived =
                    all_settled(&pool.queue, pool.inputs(&cells)).then(|v| Ok(v.len() as i32));
                pool.push(derived, None);
            }
            Op::Any { cells } => {
                let (promise, settler) = Promise::new(&pool.queue);
                let (on_ok, on_err) = (settler.clone(), settler);
                any(&pool.queue, pool.inputs(&cells)).then_or_else(
                    move |v| {
                        on_ok.fulfill(v);
                        Ok(())
                    },
                    move |aggregate| {
                        on_err.reject(Error::msg(aggregate.to_string()));
                        Ok(())
                    },
                );
                pool.push(promise, None);
            }
            Op::Drain => {
                pool.queue.drain();
            }
            Op::DrainBudget(n) => {
                pool.queue.drain_budget(usize::from(n));
            }
        }
        pool.check();
    }

    pool.queue.drain();
    pool.check();
});
