//! Single-assignment result slot.
//!
//! The reassembly loop can reach a terminal decision from several places (a
//! failed read, a sink error, the stall detector, cancellation, the last block
//! being written). Only the first decision counts; the slot refuses every
//! later one and logs it instead.

use std::fmt;

use tracing::warn;

pub(crate) struct Completion<T, E> {
    result: Option<Result<T, E>>,
}

impl<T, E> Completion<T, E>
where
    E: fmt::Display,
{
    pub fn new() -> Self {
        Self { result: None }
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_some()
    }

    /// Stores `result` unless a result is already present
    ///
    /// # Returns
    ///
    /// `true` if this call settled the slot
    pub fn settle(&mut self, result: Result<T, E>) -> bool {
        if self.result.is_some() {
            match &result {
                Ok(_) => warn!("completion already settled, ignoring success"),
                Err(e) => warn!("completion already settled, ignoring failure: {}", e),
            }
            return false;
        }
        self.result = Some(result);
        true
    }

    pub fn take(&mut self) -> Option<Result<T, E>> {
        self.result.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settlement_wins() {
        let mut slot: Completion<u32, String> = Completion::new();
        assert!(!slot.is_settled());
        assert!(slot.settle(Ok(1)));
        assert!(!slot.settle(Err("late failure".to_string())));
        assert!(!slot.settle(Ok(2)));
        assert_eq!(slot.take(), Some(Ok(1)));
    }

    #[test]
    fn failure_is_kept_over_later_success() {
        let mut slot: Completion<u32, String> = Completion::new();
        assert!(slot.settle(Err("first".to_string())));
        assert!(!slot.settle(Ok(7)));
        assert!(slot.is_settled());
        assert_eq!(slot.take(), Some(Err("first".to_string())));
    }
}
