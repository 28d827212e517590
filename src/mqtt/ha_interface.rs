use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize, PartialEq, Deserialize, Clone, Default, Debug)]
pub enum HAPlatform {
    #[default]
    Sensor,
    BinarySensor,
    Button,
}

impl HAPlatform {
    pub fn to_string(&self) -> String {
        match self {
            HAPlatform::Sensor => "sensor".to_string(),
            HAPlatform::BinarySensor => "binary_sensor".to_string(),
            HAPlatform::Button => "button".to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<String>,
}

impl HaComponent {
    /// Button sending `payload` to the command topic of the meter
    pub fn new_button(device: &str, name: &str, command_topic: String, payload: &str) -> Self {
        let safe_name = name.replace(" ", "_");
        return HaComponent {
            p: HAPlatform::Button.to_string(),
            name: name.to_string(),
            device_class: "NONE".to_string(),
            value_template: "NONE".to_string(),
            unique_id: format!("pf2m_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_topic: None,
            command_topic: Some(command_topic),
            payload_on: None,
            payload_off: None,
            payload_press: Some(payload.to_string()),
        };
    }

    /// Problem sensor that turns on when the last command failed
    pub fn new_command_problem(device: &str, name: &str, result_topic: String) -> Self {
        let safe_name = name.replace(" ", "_");
        return HaComponent {
            p: HAPlatform::BinarySensor.to_string(),
            name: name.to_string(),
            device_class: "problem".to_string(),
            value_template: "{{ 'OFF' if value_json.success else 'ON' }}".to_string(),
            unique_id: format!("pf2m_{device}_{safe_name}").to_lowercase(),
            object_id: format!("{device}_{safe_name}").to_lowercase(),
            state_topic: Some(result_topic),
            command_topic: None,
            payload_on: Some("ON".to_string()),
            payload_off: Some("OFF".to_string()),
            payload_press: None,
        };
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(name: &str, manu: &str, model: &str) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/pf2m_{}/config", name),
            dev: HaDevice {
                ids: format!("pf2m_{}", name),
                name: name.to_string(),
                manufacturer: manu.to_string(),
                model: model.to_string(),
            },
            o: HaOrigin {
                name: "peacefair2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            cmps: serde_json::Map::new(),
            qos: 1,
        };
    }

    pub fn add(&mut self, key: &str, cmp: HaComponent) {
        if let Ok(v) = serde_json::to_value(cmp) {
            self.cmps.insert(key.to_string(), v);
        }
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}
