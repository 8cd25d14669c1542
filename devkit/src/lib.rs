/*!
# Meshscope DevKit - Mock bridge et utilitaires de test

Bibliothèque facilitant les tests du bridge sans broker MQTT:
- Mock bridge implémentant `Publisher` (réponses scriptées, pannes)
- Builders de payloads au format du bridge
- Harness de test bout-en-bout (protocole, télémétrie, analyse)
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MeshMessageBuilder, MockBridge, PublishedMessage};
pub use test_utils::TestHarness;
