//! Bus topology constants: exchange and queue names, and the routing
//! keys carried on outbound publishes. Queue/exchange names are namespaced
//! with `{environment}_` at publish/subscribe time via `Config::namespaced`,
//! never baked in here.

pub const EXCHANGE_COMMANDS: &str = "commands";
pub const EXCHANGE_COPY_TRADE_EVENTS: &str = "copy_trade_events";
pub const EXCHANGE_NOTIFICATIONS: &str = "notifications";
pub const EXCHANGE_DEAD_LETTER: &str = "dead_letter";

pub const ROUTING_KEY_KOL_TRADE_DETECTED: &str = "kol.trade.detected";
pub const ROUTING_KEY_COPY_TRADE_REQUEST: &str = "copy.trade.request";
pub const ROUTING_KEY_COPY_TRADE_COMPLETED: &str = "copy.trade.completed";
pub const ROUTING_KEY_CLIENT_NOTIFICATION: &str = "client.notification";
pub const ROUTING_KEY_SERVICE_STATUS: &str = "service.status";

/// A durable queue bound to one exchange. `pattern` documents the routing
/// pattern the queue would bind with on a real topic exchange; under the
/// Kafka mapping every queue subscribes to the whole topic as its own
/// consumer group and filters locally via `BusHandler::can_handle`.
pub struct QueueBinding {
    pub name: &'static str,
    pub exchange: &'static str,
    pub pattern: &'static str,
}

pub const QUEUE_SUBSCRIPTION_COMMANDS: QueueBinding = QueueBinding {
    name: "subscription_commands",
    exchange: EXCHANGE_COMMANDS,
    pattern: "subscription.*",
};

pub const QUEUE_KOL_MANAGEMENT: QueueBinding = QueueBinding {
    name: "kol_management",
    exchange: EXCHANGE_COMMANDS,
    pattern: "kol.*",
};

pub const QUEUE_SERVICE_COMMANDS: QueueBinding = QueueBinding {
    name: "service_commands",
    exchange: EXCHANGE_COMMANDS,
    pattern: "service.*",
};

pub const QUEUE_KOL_TRADE_DETECTED: QueueBinding = QueueBinding {
    name: "kol_trade_detected",
    exchange: EXCHANGE_COPY_TRADE_EVENTS,
    pattern: ROUTING_KEY_KOL_TRADE_DETECTED,
};

pub const QUEUE_COPY_TRADE_REQUESTS: QueueBinding = QueueBinding {
    name: "copy_trade_requests",
    exchange: EXCHANGE_COPY_TRADE_EVENTS,
    pattern: ROUTING_KEY_COPY_TRADE_REQUEST,
};

pub const QUEUE_COPY_TRADE_COMPLETED: QueueBinding = QueueBinding {
    name: "copy_trade_completed",
    exchange: EXCHANGE_COPY_TRADE_EVENTS,
    pattern: ROUTING_KEY_COPY_TRADE_COMPLETED,
};

pub const QUEUE_CLIENT_NOTIFICATIONS: QueueBinding = QueueBinding {
    name: "client_notifications",
    exchange: EXCHANGE_NOTIFICATIONS,
    pattern: ROUTING_KEY_CLIENT_NOTIFICATION,
};

pub const QUEUE_SERVICE_STATUS: QueueBinding = QueueBinding {
    name: "service_status",
    exchange: EXCHANGE_NOTIFICATIONS,
    pattern: ROUTING_KEY_SERVICE_STATUS,
};

pub const QUEUE_DEAD_LETTER: QueueBinding = QueueBinding {
    name: "dead_letter",
    exchange: EXCHANGE_DEAD_LETTER,
    pattern: "#",
};

/// Message TTL applied to every non-DLQ queue: 1 hour.
pub const QUEUE_MESSAGE_TTL_MS: u64 = 3_600_000;
