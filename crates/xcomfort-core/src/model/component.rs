use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xcomfort_api::protocol::comp_type;

/// A physical module. One component can expose several devices, e.g. a
/// multisensor rocker exposes the push button and its climate sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: u32,
    pub comp_type: u32,
    pub name: String,
    /// Configuration mode as reported, e.g. door vs. window contact.
    pub mode: Option<String>,
    /// Latest numeric `info[]` readings by code.
    pub readings: BTreeMap<String, f64>,
}

impl Component {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            comp_type: 0,
            name: String::new(),
            mode: None,
            readings: BTreeMap::new(),
        }
    }

    /// Rocker with a built-in temperature and humidity sensor.
    pub fn is_multi_sensor(&self) -> bool {
        self.comp_type == comp_type::MULTI_SENSOR
    }

    pub fn reading(&self, code: &str) -> Option<f64> {
        self.readings.get(code).copied()
    }
}
