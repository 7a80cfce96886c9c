//! Observation of resources: an [observable_resource::ObservableResource] holds one resource's
//!  current status, and every change to it becomes a
//!  [observable_resource::ResourceUpdate] that the
//!  [notification_dispatcher::NotificationDispatcher] turns into one notification per
//!  registered [observer_registry::Observer].

pub mod notification_dispatcher;
pub mod observable_resource;
pub mod observer_registry;
pub mod resource_handler;
pub mod wrapped_status;
