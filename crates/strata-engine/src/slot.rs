//! Per-layer operation slots
//!
//! Each layer id owns at most one slot during a reconciliation pass. A
//! pending slot holds the live materialization for that id; occupying the
//! slot again cancels that operation first, running its cleanup before the
//! replacement is stored.

use std::collections::HashMap;

use strata_core::{LayerAttributes, LayerError, LayerId};
use strata_ops::{CancellableOperation, OperationState};

/// Declaration a materialization was started from
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub provider: String,
    pub attributes: LayerAttributes,
}

pub(crate) enum Slot<H> {
    /// Reconciled without asynchronous work
    Ready,
    /// Failed before any operation started
    Failed(LayerError),
    /// Materialization in flight
    Pending {
        operation: CancellableOperation<H>,
        snapshot: Snapshot,
    },
}

pub(crate) struct SlotMap<H> {
    slots: HashMap<LayerId, Slot<H>>,
}

impl<H> SlotMap<H> {
    pub fn new() -> Self {
        SlotMap {
            slots: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: &LayerId) -> bool {
        self.slots.contains_key(id)
    }

    /// Cancel a live operation for `id` and free the slot
    ///
    /// Returns true when a pending operation was cancelled.
    pub fn supersede(&mut self, id: &LayerId) -> bool {
        match self.slots.remove(id) {
            Some(Slot::Pending { operation, .. }) => operation.cancel(),
            _ => false,
        }
    }

    /// Store a slot for `id`, superseding whatever held it
    pub fn occupy(&mut self, id: LayerId, slot: Slot<H>) -> bool {
        let superseded = self.supersede(&id);
        self.slots.insert(id, slot);
        superseded
    }

    pub fn take(&mut self, id: &LayerId) -> Option<Slot<H>> {
        self.slots.remove(id)
    }

    pub fn operation(&self, id: &LayerId) -> Option<&CancellableOperation<H>> {
        match self.slots.get(id) {
            Some(Slot::Pending { operation, .. }) => Some(operation),
            _ => None,
        }
    }

    pub fn operation_state(&self, id: &LayerId) -> Option<OperationState> {
        self.operation(id).map(CancellableOperation::state)
    }

    /// Number of operations still pending
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { operation, .. } if operation.is_pending()))
            .count()
    }

    /// Remove every slot that is no longer waiting on an operation
    ///
    /// Pending slots whose operation already settled are returned so their
    /// outcome can still be applied; ready and failed slots are dropped.
    pub fn drain_settled(&mut self) -> Vec<(LayerId, CancellableOperation<H>, Snapshot)> {
        let ids: Vec<LayerId> = self
            .slots
            .iter()
            .filter(|(_, slot)| match slot {
                Slot::Pending { operation, .. } => !operation.is_pending(),
                _ => true,
            })
            .map(|(id, _)| id.clone())
            .collect();

        let mut settled = Vec::new();
        for id in ids {
            if let Some(Slot::Pending {
                operation,
                snapshot,
            }) = self.slots.remove(&id)
            {
                settled.push((id, operation, snapshot));
            }
        }
        settled
    }

    pub fn ids(&self) -> Vec<LayerId> {
        self.slots.keys().cloned().collect()
    }

    /// Cancel everything still pending and drop all slots
    pub fn clear(&mut self) -> usize {
        let ids = self.ids();
        ids.iter().filter(|id| self.supersede(id)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ops::OperationError;
    use tokio::sync::oneshot;

    fn snapshot() -> Snapshot {
        Snapshot {
            provider: "wms".into(),
            attributes: LayerAttributes::default(),
        }
    }

    fn pending() -> (CancellableOperation<u32>, oneshot::Sender<u32>) {
        let (tx, rx) = oneshot::channel();
        let op = CancellableOperation::from_future(async move {
            rx.await.map_err(|_| OperationError::Abandoned)
        });
        (op, tx)
    }

    #[tokio::test]
    async fn test_occupy_supersedes_pending_operation() {
        let mut slots = SlotMap::new();
        let id = LayerId::new("a");
        let (first, _tx1) = pending();
        let (second, _tx2) = pending();

        assert!(!slots.occupy(
            id.clone(),
            Slot::Pending {
                operation: first.clone(),
                snapshot: snapshot(),
            },
        ));
        assert!(slots.occupy(
            id.clone(),
            Slot::Pending {
                operation: second,
                snapshot: snapshot(),
            },
        ));

        assert_eq!(first.state(), OperationState::Cancelled);
        assert_eq!(slots.pending(), 1);
        assert_eq!(slots.operation_state(&id), Some(OperationState::Pending));
    }

    #[tokio::test]
    async fn test_drain_settled_keeps_live_operations() {
        let mut slots = SlotMap::new();
        let (op, tx) = pending();
        slots.occupy(
            LayerId::new("a"),
            Slot::Pending {
                operation: op.clone(),
                snapshot: snapshot(),
            },
        );
        slots.occupy(LayerId::new("b"), Slot::Ready);

        assert!(slots.drain_settled().is_empty());
        assert!(slots.contains(&LayerId::new("a")));
        assert!(!slots.contains(&LayerId::new("b")));

        tx.send(1).unwrap();
        op.settled().await;
        let drained = slots.drain_settled();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, LayerId::new("a"));
        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cancels_pending() {
        let mut slots = SlotMap::new();
        let (op, _tx) = pending();
        slots.occupy(
            LayerId::new("a"),
            Slot::Pending {
                operation: op.clone(),
                snapshot: snapshot(),
            },
        );
        slots.occupy(LayerId::new("b"), Slot::Failed(LayerError::ProviderUnsupported("x".into())));

        assert_eq!(slots.clear(), 1);
        assert!(slots.is_empty());
        assert_eq!(op.state(), OperationState::Cancelled);
    }
}
