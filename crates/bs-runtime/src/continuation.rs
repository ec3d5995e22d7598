use bs_core::{ScriptError, ScriptValue};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a suspended continuation is already stored")]
    Occupied,
    #[error("no suspended continuation is stored")]
    Empty,
}

impl From<StoreError> for ScriptError {
    fn from(error: StoreError) -> Self {
        ScriptError::store(error.to_string())
    }
}

#[derive(Debug)]
struct Slot<C> {
    continuation: C,
    pending: Option<ScriptValue>,
}

/// Holds at most one suspended continuation together with the value it will
/// be resumed with.
#[derive(Debug)]
pub struct ContinuationStore<C> {
    slot: Option<Slot<C>>,
}

impl<C> Default for ContinuationStore<C> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<C> ContinuationStore<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, continuation: C) -> Result<(), StoreError> {
        if self.slot.is_some() {
            return Err(StoreError::Occupied);
        }
        self.slot = Some(Slot {
            continuation,
            pending: None,
        });
        Ok(())
    }

    pub fn set_pending(&mut self, value: ScriptValue) -> Result<(), StoreError> {
        let slot = self.slot.as_mut().ok_or(StoreError::Empty)?;
        slot.pending = Some(value);
        Ok(())
    }

    pub fn take(&mut self) -> Result<(C, Option<ScriptValue>), StoreError> {
        let slot = self.slot.take().ok_or(StoreError::Empty)?;
        Ok((slot.continuation, slot.pending))
    }

    pub fn clear(&mut self) -> Option<C> {
        self.slot.take().map(|slot| slot.continuation)
    }

    pub fn peek(&self) -> Option<&C> {
        self.slot.as_ref().map(|slot| &slot.continuation)
    }

    pub fn pending(&self) -> Option<&ScriptValue> {
        self.slot.as_ref().and_then(|slot| slot.pending.as_ref())
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_take_returns_continuation_and_pending_value() {
        let mut store = ContinuationStore::new();
        store.put("after-move").expect("put should pass");
        store
            .set_pending(ScriptValue::Number(42.0))
            .expect("pending should pass");
        assert_eq!(store.pending(), Some(&ScriptValue::Number(42.0)));

        let (continuation, pending) = store.take().expect("take should pass");
        assert_eq!(continuation, "after-move");
        assert_eq!(pending, Some(ScriptValue::Number(42.0)));
        assert!(!store.is_occupied());
    }

    #[test]
    fn second_put_is_rejected_and_keeps_the_first() {
        let mut store = ContinuationStore::new();
        store.put(1).expect("first put");
        assert_eq!(store.put(2), Err(StoreError::Occupied));
        assert_eq!(store.peek(), Some(&1));
    }

    #[test]
    fn take_and_set_pending_fail_when_empty() {
        let mut store: ContinuationStore<u8> = ContinuationStore::new();
        assert_eq!(store.take().err(), Some(StoreError::Empty));
        assert_eq!(store.set_pending(ScriptValue::Nil), Err(StoreError::Empty));
        assert!(store.pending().is_none());
    }

    #[test]
    fn clear_discards_the_pair() {
        let mut store = ContinuationStore::new();
        store.put("scan").expect("put");
        store.set_pending(ScriptValue::Bool(true)).expect("pending");
        assert_eq!(store.clear(), Some("scan"));
        assert!(store.clear().is_none());
        assert!(store.pending().is_none());
    }

    #[test]
    fn store_error_maps_to_script_error_code() {
        let error: ScriptError = StoreError::Occupied.into();
        assert_eq!(error.code(), "ENGINE_CONTINUATION_STORE");
    }
}
