use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod outbox;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing the caller
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A paid booking was committed; receipt and confirmation email follow
    BookingConfirmed {
        booking_id: Uuid,
        user_id: Uuid,
        payment_intent_id: Uuid,
        external_payment_id: String,
        receipt_reference: Option<String>,
    },
    /// A webhook could not be materialized and needs an operator
    PaymentNeedsReview {
        external_payment_id: String,
        status: String,
        note: Option<String>,
    },
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
        }
    }
}

/// Consumer of post-commit side effects (receipts, confirmation emails).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Default handler: records the hand-off to the notification collaborators.
pub struct LoggingNotifier;

#[async_trait]
impl EventHandler for LoggingNotifier {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::BookingConfirmed {
                booking_id,
                user_id,
                receipt_reference,
                ..
            } => {
                info!(
                    %booking_id,
                    %user_id,
                    receipt = receipt_reference.as_deref().unwrap_or("-"),
                    "dispatching booking receipt and confirmation email"
                );
            }
            Event::PaymentNeedsReview {
                external_payment_id,
                status,
                note,
            } => {
                warn!(
                    external_payment_id = %external_payment_id,
                    status = %status,
                    note = note.as_deref().unwrap_or("-"),
                    "payment parked for manual review"
                );
            }
            Event::Generic { message, .. } => info!("event: {}", message),
        }
        Ok(())
    }
}

/// Drains the channel and fans each event out to every handler. Handler
/// failures are logged only; committed state is never touched here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Event handler failed for {:?}: {}", event, e);
            }
        }
    }

    info!("Event channel closed; processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<Event>>);

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle_event(&self, event: &Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.clone());
            Err("smtp down".into())
        }
    }

    #[tokio::test]
    async fn handler_failures_do_not_stop_processing() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recorder = Arc::new(Recording(Mutex::new(Vec::new())));

        sender.send_or_log(Event::with_data("one".into())).await;
        sender.send_or_log(Event::with_data("two".into())).await;
        drop(sender);

        process_events(rx, vec![recorder.clone(), Arc::new(LoggingNotifier)]).await;
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::with_data("lost".into())).await.is_err());
    }
}
