use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, PaymentStatusChangedEvent, RefundRecordedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub payment_status_changed_producer: Vec<EventProducer<PaymentStatusChangedEvent>>,
    pub refund_recorded_producer: Vec<EventProducer<RefundRecordedEvent>>,
}

pub struct EventHandlers {
    pub on_payment_status_changed: Option<EventHandler<PaymentStatusChangedEvent>>,
    pub on_refund_recorded: Option<EventHandler<RefundRecordedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_payment_status_changed = hooks
            .on_payment_status_changed
            .map(|f| EventHandler::new("payment_status_changed", buffer_size, f));
        let on_refund_recorded = hooks.on_refund_recorded.map(|f| EventHandler::new("refund_recorded", buffer_size, f));
        Self { on_payment_status_changed, on_refund_recorded }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_payment_status_changed {
            result.payment_status_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_refund_recorded {
            result.refund_recorded_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns a task for every registered handler. Each task ends once all of its producers have been dropped.
    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_payment_status_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_refund_recorded {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_payment_status_changed: Option<Handler<PaymentStatusChangedEvent>>,
    pub on_refund_recorded: Option<Handler<RefundRecordedEvent>>,
}

impl EventHooks {
    pub fn on_payment_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PaymentStatusChangedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payment_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_refund_recorded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RefundRecordedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_refund_recorded = Some(Arc::new(f));
        self
    }
}
