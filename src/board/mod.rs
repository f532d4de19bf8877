//! # Board Model
//!
//! In-memory representation of the controller board and the sub-devices wired
//! to it. There is exactly one [`Board`] per process; it is built at startup and
//! owned by the session controller for the lifetime of the process.
//!
//! ## Ownership
//! The session task is the only writer. Device values are refreshed from the
//! actuator before every status report, so a [`Device`] value always mirrors
//! the applied hardware level rather than the last requested one.

use serde::Serialize;

/// A controllable sub-component attached to the board (the lamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Identity, unique within its board
    pub device_id: String,
    /// Human-readable category, e.g. `desk-lamp`
    pub name: String,
    /// String-encoded current value (brightness percentage `"0"`..`"100"`)
    pub value: String,
}

impl Device {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The physical board hosting this controller.
///
/// Devices keep insertion order, which is also the order they appear in the
/// board-info report. Addressing is always by explicit device id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    board_id: String,
    online: bool,
    devices: Vec<Device>,
}

impl Board {
    pub fn new(board_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            online: false,
            devices: Vec::new(),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Attaches a device. A device whose id is already present replaces the
    /// existing entry in place so ids stay unique.
    pub fn add_device(&mut self, device: Device) {
        match self
            .devices
            .iter_mut()
            .find(|existing| existing.device_id == device.device_id)
        {
            Some(existing) => *existing = device,
            None => self.devices.push(device),
        }
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn has_device(&self, device_id: &str) -> bool {
        self.device(device_id).is_some()
    }

    /// Updates the reported value of a device. Returns `false` when no device
    /// with that id is attached.
    pub fn set_device_value(&mut self, device_id: &str, value: impl Into<String>) -> bool {
        match self.devices.iter_mut().find(|d| d.device_id == device_id) {
            Some(device) => {
                device.value = value.into();
                true
            }
            None => false,
        }
    }

    /// Pretty JSON snapshot, used for the startup log.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable board: {e}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lamp_board() -> Board {
        let mut board = Board::new("1");
        board.add_device(Device::new("1", "desk-lamp", "0"));
        board
    }

    #[test]
    fn new_board_starts_offline_and_empty() {
        let board = Board::new("7");
        assert_eq!(board.board_id(), "7");
        assert!(!board.is_online());
        assert!(board.devices().is_empty());
    }

    #[test]
    fn devices_keep_insertion_order() {
        let mut board = lamp_board();
        board.add_device(Device::new("2", "fan", "0"));
        let ids: Vec<_> = board.devices().iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn adding_duplicate_id_replaces_device() {
        let mut board = lamp_board();
        board.add_device(Device::new("1", "ceiling-lamp", "40"));
        assert_eq!(board.devices().len(), 1);
        assert_eq!(board.device("1").map(|d| d.name.as_str()), Some("ceiling-lamp"));
    }

    #[test]
    fn set_value_on_unknown_device_is_rejected() {
        let mut board = lamp_board();
        assert!(!board.set_device_value("9", "10"));
        assert!(board.set_device_value("1", "10"));
        assert_eq!(board.device("1").map(|d| d.value.as_str()), Some("10"));
    }

    #[test]
    fn json_uses_camel_case_fields() {
        let json = lamp_board().to_json();
        assert!(json.contains("\"boardId\": \"1\""));
        assert!(json.contains("\"deviceId\": \"1\""));
        assert!(json.contains("\"online\": false"));
    }
}
