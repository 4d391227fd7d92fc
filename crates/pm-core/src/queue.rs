use crate::types::EvaluationId;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("evaluation queue closed; {id} was not dispatched")]
pub struct QueueClosed {
    pub id: EvaluationId,
}

/// Fire-and-forget hand-off of evaluations to the background worker.
#[derive(Clone)]
pub struct EvaluationQueue {
    sender: mpsc::UnboundedSender<EvaluationId>,
}

pub struct EvaluationReceiver {
    receiver: mpsc::UnboundedReceiver<EvaluationId>,
}

pub fn channel() -> (EvaluationQueue, EvaluationReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EvaluationQueue { sender }, EvaluationReceiver { receiver })
}

impl EvaluationQueue {
    pub fn dispatch(&self, id: EvaluationId) -> Result<(), QueueClosed> {
        self.sender
            .send(id)
            .map_err(|mpsc::error::SendError(id)| QueueClosed { id })
    }
}

impl EvaluationReceiver {
    pub async fn recv(&mut self) -> Option<EvaluationId> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<EvaluationId> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatched_ids_arrive_in_order() {
        let (queue, mut rx) = channel();
        let first = EvaluationId::generate();
        let second = EvaluationId::generate();
        queue.dispatch(first.clone()).unwrap();
        queue.dispatch(second.clone()).unwrap();
        assert_eq!(rx.try_recv(), Some(first));
        assert_eq!(rx.try_recv(), Some(second));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn dispatch_after_receiver_dropped_returns_the_id() {
        let (queue, rx) = channel();
        drop(rx);
        let id = EvaluationId::generate();
        let err = queue.dispatch(id.clone()).unwrap_err();
        assert_eq!(err.id, id);
    }
}
