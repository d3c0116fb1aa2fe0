pub mod console_notifier;
pub mod email_notifier;
pub mod fake_fetcher;
pub mod http_fetcher;
pub mod memory_store;
pub mod multi_notifier;
pub mod sqlite_store;
pub mod telegram_notifier;
pub mod webhook_notifier;
