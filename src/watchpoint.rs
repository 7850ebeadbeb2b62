use tracing::debug;

use crate::eval::{self, EvalContext, ExprError};
use crate::Word;

pub const NR_WP: usize = 32;

#[derive(Debug, Default)]
pub struct Watchpoint {
    id: usize,
    expr: String,
    value: Word,
    next: Option<usize>,
}

impl Watchpoint {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn value(&self) -> Word {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    Capacity,
    NotFound(usize),
    InvalidExpression(ExprError),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Capacity => write!(f, "Not enough watchpoints left (all {NR_WP} in use)"),
            WatchError::NotFound(id) => write!(f, "No watchpoint number {id}"),
            WatchError::InvalidExpression(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WatchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHit {
    pub id: usize,
    pub expr: String,
    pub old_value: Word,
    pub new_value: Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidWatch {
    pub id: usize,
    pub expr: String,
    pub error: ExprError,
}

#[derive(Debug, Default)]
pub struct WatchReport {
    pub hits: Vec<WatchHit>,
    pub invalid: Vec<InvalidWatch>,
}

impl WatchReport {
    pub fn triggered(&self) -> bool {
        !self.hits.is_empty()
    }
}

/// Fixed pool of watch slots split into a free list and an active list.
/// Both lists are threaded through the slots' `next` indices.
pub struct WatchpointManager {
    pool: [Watchpoint; NR_WP],
    head: Option<usize>,
    free: Option<usize>,
}

pub struct ActiveWatchpoints<'a> {
    pool: &'a [Watchpoint; NR_WP],
    cursor: Option<usize>,
}

impl<'a> Iterator for ActiveWatchpoints<'a> {
    type Item = &'a Watchpoint;

    fn next(&mut self) -> Option<Self::Item> {
        let wp = &self.pool[self.cursor?];
        self.cursor = wp.next;
        Some(wp)
    }
}

impl WatchpointManager {
    pub fn new() -> WatchpointManager {
        let mut manager = WatchpointManager {
            pool: std::array::from_fn(|id| Watchpoint { id, ..Default::default() }),
            head: None,
            free: None,
        };
        manager.init();
        manager
    }

    pub fn init(&mut self) {
        for (i, wp) in self.pool.iter_mut().enumerate() {
            wp.expr.clear();
            wp.value = 0;
            wp.next = if i + 1 < NR_WP { Some(i + 1) } else { None };
        }
        self.head = None;
        self.free = Some(0);
    }

    fn new_wp(&mut self) -> Result<usize, WatchError> {
        let id = self.free.ok_or(WatchError::Capacity)?;
        self.free = self.pool[id].next;
        self.pool[id].next = self.head;
        self.head = Some(id);
        Ok(id)
    }

    fn free_wp(&mut self, id: usize) -> Result<(), WatchError> {
        if id >= NR_WP {
            return Err(WatchError::NotFound(id));
        }
        if self.head == Some(id) {
            self.head = self.pool[id].next;
        } else {
            let mut prev = self.head;
            while let Some(p) = prev {
                if self.pool[p].next == Some(id) {
                    break;
                }
                prev = self.pool[p].next;
            }
            let prev = prev.ok_or(WatchError::NotFound(id))?;
            self.pool[prev].next = self.pool[id].next;
        }
        self.pool[id].next = self.free;
        self.free = Some(id);
        Ok(())
    }

    pub fn watch(&mut self, expr: &str, context: &EvalContext) -> Result<&Watchpoint, WatchError> {
        if self.free.is_none() {
            return Err(WatchError::Capacity);
        }
        let value = eval::evaluate_expression(expr, context).map_err(WatchError::InvalidExpression)?;
        let id = self.new_wp()?;
        let wp = &mut self.pool[id];
        wp.expr = expr.to_string();
        wp.value = value;
        debug!(id, expr, value, "watchpoint installed");
        Ok(wp)
    }

    /// Active watchpoints, most recently created first.
    pub fn iter(&self) -> ActiveWatchpoints<'_> {
        ActiveWatchpoints { pool: &self.pool, cursor: self.head }
    }

    pub fn list(&self) -> Vec<(usize, &str)> {
        self.iter().map(|wp| (wp.id, wp.expr())).collect()
    }

    /// Removes an active watchpoint, returning the expression it watched.
    pub fn delete(&mut self, id: usize) -> Result<String, WatchError> {
        self.free_wp(id)?;
        let expr = std::mem::take(&mut self.pool[id].expr);
        self.pool[id].value = 0;
        debug!(id, expr = expr.as_str(), "watchpoint deleted");
        Ok(expr)
    }

    pub fn check_all(&mut self, context: &EvalContext) -> WatchReport {
        let mut report = WatchReport::default();
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let wp = &mut self.pool[id];
            cursor = wp.next;
            match eval::evaluate_expression(&wp.expr, context) {
                Err(error) => {
                    report.invalid.push(InvalidWatch { id, expr: wp.expr.clone(), error });
                }
                Ok(new_value) if new_value != wp.value => {
                    report.hits.push(WatchHit {
                        id,
                        expr: wp.expr.clone(),
                        old_value: wp.value,
                        new_value,
                    });
                    wp.value = new_value;
                }
                Ok(_) => {}
            }
        }
        report
    }

    pub fn display(&self) {
        if self.head.is_none() {
            println!("No watchpoints.");
            return;
        }
        println!("{:<4} {}", "Num", "What");
        for (id, expr) in self.list() {
            println!("{:<4} {}", id, expr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{EvalError, ParseError};
    use crate::memory::{GuestMemory, MBASE};
    use crate::registers::RegisterFile;

    fn target() -> (RegisterFile, GuestMemory) {
        (RegisterFile::new(MBASE), GuestMemory::new(MBASE, 0x40))
    }

    #[test]
    fn watch_records_initial_value() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        let wp = manager.watch("1+1", &context).unwrap();
        assert_eq!(wp.id(), 0);
        assert_eq!(wp.value(), 2);
        assert_eq!(wp.expr(), "1+1");
        assert!(!manager.check_all(&context).triggered());
    }

    #[test]
    fn check_reports_transitions() {
        let (mut regs, mem) = target();
        regs.write(10, 1);
        let mut manager = WatchpointManager::new();
        let id = {
            let context = EvalContext { registers: &regs, memory: &mem };
            manager.watch("$a0+1", &context).unwrap().id()
        };

        regs.write(10, 2);
        let context = EvalContext { registers: &regs, memory: &mem };
        let report = manager.check_all(&context);
        assert_eq!(
            report.hits,
            vec![WatchHit { id, expr: "$a0+1".to_string(), old_value: 2, new_value: 3 }]
        );
        assert_eq!(manager.iter().find(|wp| wp.id() == id).unwrap().value(), 3);
        assert!(!manager.check_all(&context).triggered());
    }

    #[test]
    fn invalid_watch_does_not_stop_the_check() {
        let (mut regs, mem) = target();
        let mut manager = WatchpointManager::new();
        {
            let context = EvalContext { registers: &regs, memory: &mem };
            manager.watch("$t0", &context).unwrap();
            manager.watch("10/($t0+1)", &context).unwrap();
            manager.watch("$t0*2", &context).unwrap();
        }
        regs.write(5, Word::MAX);
        let context = EvalContext { registers: &regs, memory: &mem };
        let report = manager.check_all(&context);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].id, 1);
        assert_eq!(report.invalid[0].error, ExprError::Eval(EvalError::DivisionByZero));
        let hit_ids: Vec<usize> = report.hits.iter().map(|hit| hit.id).collect();
        assert_eq!(hit_ids, vec![2, 0]);
    }

    #[test]
    fn invalid_expression_is_rejected_without_using_a_slot() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        assert_eq!(
            manager.watch("(1+2", &context).unwrap_err(),
            WatchError::InvalidExpression(ExprError::Parse(ParseError::UnbalancedParentheses))
        );
        assert!(manager.list().is_empty());
        assert_eq!(manager.watch("3", &context).unwrap().id(), 0);
    }

    #[test]
    fn list_is_most_recent_first() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        manager.watch("1", &context).unwrap();
        manager.watch("2", &context).unwrap();
        manager.watch("3", &context).unwrap();
        assert_eq!(manager.list(), vec![(2, "3"), (1, "2"), (0, "1")]);
    }

    #[test]
    fn capacity_is_bounded() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        for i in 0..NR_WP {
            assert_eq!(manager.watch(&i.to_string(), &context).unwrap().id(), i);
        }
        let before = manager.list().into_iter().map(|(id, e)| (id, e.to_string())).collect::<Vec<_>>();
        let err = manager.watch("1", &context).unwrap_err();
        assert_eq!(err, WatchError::Capacity);
        assert_eq!(err.to_string(), "Not enough watchpoints left (all 32 in use)");
        let after = manager.list().into_iter().map(|(id, e)| (id, e.to_string())).collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn delete_returns_slot_to_free_list() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        for i in 0..3 {
            manager.watch(&i.to_string(), &context).unwrap();
        }
        assert_eq!(manager.delete(1), Ok("1".to_string()));
        assert_eq!(manager.list(), vec![(2, "2"), (0, "0")]);
        // The freed slot is reused first
        assert_eq!(manager.watch("7", &context).unwrap().id(), 1);
        assert_eq!(manager.delete(1), Ok("7".to_string()));
        assert_eq!(manager.delete(2), Ok("2".to_string()));
        assert_eq!(manager.delete(0), Ok("0".to_string()));
        assert!(manager.list().is_empty());
    }

    #[test]
    fn delete_twice_or_unknown_fails() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        let id = manager.watch("1", &context).unwrap().id();
        manager.watch("2", &context).unwrap();
        assert!(manager.delete(id).is_ok());
        assert_eq!(manager.delete(id), Err(WatchError::NotFound(id)));
        assert_eq!(manager.delete(5), Err(WatchError::NotFound(5)));
        assert_eq!(manager.delete(NR_WP), Err(WatchError::NotFound(NR_WP)));
        assert_eq!(manager.list(), vec![(1, "2")]);
    }

    #[test]
    fn every_slot_is_in_exactly_one_list() {
        let (regs, mem) = target();
        let context = EvalContext { registers: &regs, memory: &mem };
        let mut manager = WatchpointManager::new();
        for i in 0..10 {
            manager.watch(&i.to_string(), &context).unwrap();
        }
        for id in [3, 7, 0] {
            manager.delete(id).unwrap();
        }
        let mut seen = [0u8; NR_WP];
        for wp in manager.iter() {
            seen[wp.id()] += 1;
        }
        let mut cursor = manager.free;
        while let Some(id) = cursor {
            seen[id] += 1;
            cursor = manager.pool[id].next;
        }
        assert!(seen.iter().all(|&count| count == 1));
        manager.init();
        assert!(manager.list().is_empty());
        assert_eq!(manager.watch("1", &context).unwrap().id(), 0);
    }
}
