/*!
# CrowdWatch DevKit - Test doubles and fixtures

Shared by the kernel tests and the simulator:
- MQTT mock client (records publishes, can simulate a broker outage)
- Message builders for the crowdwatch MQTT contracts
- Zone fixtures for the Bukit Jalil stadium layout
*/

pub mod fixtures;
pub mod mqtt_stub;

pub use mqtt_stub::{CrowdMessageBuilder, MockMqttClient};
