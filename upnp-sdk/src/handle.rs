//! Handles issued to registered control points and devices.

use std::fmt;

/// Identifies the registered control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(i32);

/// Identifies the registered root device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(i32);

impl ClientHandle {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl DeviceHandle {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for ClientHandle {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<i32> for DeviceHandle {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}
