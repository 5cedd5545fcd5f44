use crate::protocol::Outcome;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CollectorError {
    #[error("received more outcomes than the {expected} points of this cycle")]
    Overflow { expected: usize },
    #[error("cycle incomplete: {received} of {expected} outcomes")]
    Incomplete { expected: usize, received: usize },
}

/// Accumulates one outcome per point, in issue order, for a single cycle.
#[derive(Debug)]
pub struct ResponseCollector {
    expected: usize,
    outcomes: Vec<Outcome>,
}

impl ResponseCollector {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            outcomes: Vec::with_capacity(expected),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.len() == self.expected
    }

    pub fn on_complete(&mut self, outcome: Outcome) -> Result<(), CollectorError> {
        if self.is_complete() {
            return Err(CollectorError::Overflow {
                expected: self.expected,
            });
        }
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<Outcome>, CollectorError> {
        if !self.is_complete() {
            return Err(CollectorError::Incomplete {
                expected: self.expected,
                received: self.outcomes.len(),
            });
        }
        Ok(self.outcomes)
    }
}
