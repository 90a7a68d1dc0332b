pub mod channel;
pub mod config;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы упростить
// доступ к ним из внешнего кода.
pub use channel::*;
pub use config::*;
pub use transport::*;
