//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the scheduling-backend client and the
//! change-notification broadcast.

use crate::config::Config;
use hearth_core::{notify::ChangeNotifier, schedule::SchedulerApi};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<dyn SchedulerApi>,
    pub notifier: ChangeNotifier,
}
