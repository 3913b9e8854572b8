//! Topic grammar for the Device Provisioning Service and IoT Hub
//!
//! Both services address every operation through fixed topic templates
//! parameterized by device id, correlation id (`$rid`) and, for responses,
//! a numeric status code. The templates must be reproduced verbatim; the
//! services reject anything else.

use super::property_bag::PropertyBag;

/// Device Provisioning Service topics.
///
/// See <https://docs.microsoft.com/en-us/azure/iot-dps/iot-dps-mqtt-support>.
pub mod dps {
    use super::PropertyBag;

    /// Subscription filter for all registration responses. The multi-level
    /// wildcard only serves to receive the properties embedded in response
    /// topic names; DPS is not a general-purpose broker.
    pub const REGISTRATION_RESPONSES: &str = "$dps/registrations/res/#";

    /// Register request topic carrying a fresh correlation id.
    pub fn register(request_id: &str) -> String {
        format!("$dps/registrations/PUT/iotdps-register/?$rid={request_id}")
    }

    /// Operation-status poll topic. The operation id is the one returned in
    /// the 202 response payload; the correlation id is fresh per poll.
    pub fn operation_status(request_id: &str, operation_id: &str) -> String {
        format!(
            "$dps/registrations/GET/iotdps-get-operationstatus/?$rid={request_id}&operationId={operation_id}"
        )
    }

    /// Prefix of a registration response topic for the given status code.
    /// Responses are classified by prefix match against this template.
    pub fn registration_result(status: u16) -> String {
        format!("$dps/registrations/res/{status}/")
    }

    /// MQTT username for the provisioning connection.
    pub fn username(id_scope: &str, device_id: &str) -> String {
        format!("{id_scope}/registrations/{device_id}/api-version=2019-03-31")
    }

    /// Properties embedded in a response topic name (e.g. `retry-after`).
    pub fn response_properties(topic: &str) -> PropertyBag {
        topic
            .split_once('?')
            .map(|(_, query)| PropertyBag::decode(query))
            .unwrap_or_default()
    }
}

/// IoT Hub device topics.
///
/// See <https://docs.microsoft.com/en-us/azure/iot-hub/iot-hub-mqtt-support>.
pub mod hub {
    use super::PropertyBag;

    /// Subscription filter for twin operation responses. A device must
    /// subscribe here before publishing any twin request.
    pub const TWIN_RESPONSES: &str = "$iothub/twin/res/#";

    /// Subscription filter for desired-property update notifications.
    pub const DESIRED_UPDATES: &str = "$iothub/twin/PATCH/properties/desired/#";

    /// Request the full twin document.
    pub fn get_twin(request_id: &str) -> String {
        format!("$iothub/twin/GET/?$rid={request_id}")
    }

    /// Response topic for a twin request, matched against the request's
    /// correlation id.
    pub fn twin_response(status: u16, request_id: &str) -> String {
        format!("$iothub/twin/res/{status}/?$rid={request_id}")
    }

    /// Publish topic for reported-property updates.
    pub fn update_reported(request_id: &str) -> String {
        format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
    }

    /// Whether a topic acknowledges a reported-property update. Acks are
    /// observed but intentionally ignored.
    pub fn is_reported_ack(topic: &str) -> bool {
        topic.starts_with("$iothub/twin/res/204/")
    }

    /// Whether a topic is a desired-property update notification.
    pub fn is_desired_update(topic: &str) -> bool {
        topic.starts_with("$iothub/twin/PATCH/properties/desired/")
    }

    /// Device-to-cloud message topic with an optional property-bag suffix.
    pub fn messages(device_id: &str, properties: &PropertyBag) -> String {
        format!(
            "devices/{device_id}/messages/events/{}",
            properties.topic_suffix()
        )
    }

    /// Device-to-cloud batch message topic (`batch` flag property).
    pub fn batch(device_id: &str) -> String {
        let bag: PropertyBag = [("batch", None::<&str>)].into_iter().collect();
        messages(device_id, &bag)
    }

    /// Topic the device receives A-GPS assistance data on.
    pub fn agps(device_id: &str) -> String {
        format!("{device_id}/agps")
    }

    /// Topic the device receives P-GPS prediction data on.
    pub fn pgps(device_id: &str) -> String {
        format!("{device_id}/pgps")
    }

    /// MQTT username for the hub connection, announcing the device model.
    pub fn username(assigned_hub: &str, device_id: &str, model_id: &str) -> String {
        format!("{assigned_hub}/{device_id}/?api-version=2020-09-30&model-id={model_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dps_register_topic() {
        assert_eq!(
            dps::register("52aa4502-f166-4ebc-9f7d-bbf2da93d1b5"),
            "$dps/registrations/PUT/iotdps-register/?$rid=52aa4502-f166-4ebc-9f7d-bbf2da93d1b5"
        );
    }

    #[test]
    fn dps_operation_status_topic() {
        assert_eq!(
            dps::operation_status("rid-1", "4.abc.def"),
            "$dps/registrations/GET/iotdps-get-operationstatus/?$rid=rid-1&operationId=4.abc.def"
        );
    }

    #[test]
    fn dps_response_topics_match_by_prefix() {
        let topic = "$dps/registrations/res/202/?$rid=rid-1&retry-after=3";
        assert!(topic.starts_with(&dps::registration_result(202)));
        assert!(!topic.starts_with(&dps::registration_result(200)));
        let bag = dps::response_properties(topic);
        assert_eq!(bag.get("retry-after"), Some(Some("3")));
        assert_eq!(bag.get("$rid"), Some(Some("rid-1")));
    }

    #[test]
    fn dps_username_embeds_scope_and_api_version() {
        assert_eq!(
            dps::username("0ne000ABCDE", "my-device"),
            "0ne000ABCDE/registrations/my-device/api-version=2019-03-31"
        );
    }

    #[test]
    fn hub_twin_topics() {
        assert_eq!(hub::get_twin("rid-2"), "$iothub/twin/GET/?$rid=rid-2");
        assert_eq!(
            hub::twin_response(200, "rid-2"),
            "$iothub/twin/res/200/?$rid=rid-2"
        );
        assert_eq!(
            hub::update_reported("rid-3"),
            "$iothub/twin/PATCH/properties/reported/?$rid=rid-3"
        );
    }

    #[test]
    fn hub_topic_classification() {
        assert!(hub::is_reported_ack(
            "$iothub/twin/res/204/?$rid=rid-3&$version=5"
        ));
        assert!(!hub::is_reported_ack("$iothub/twin/res/200/?$rid=rid-3"));
        assert!(hub::is_desired_update(
            "$iothub/twin/PATCH/properties/desired/?$version=2"
        ));
        assert!(!hub::is_desired_update("$iothub/twin/res/200/?$rid=x"));
    }

    #[test]
    fn hub_message_topics_carry_property_bags() {
        assert_eq!(
            hub::messages("my-device", &PropertyBag::new()),
            "devices/my-device/messages/events/"
        );
        let bag: PropertyBag = [("agps", Some("get"))].into_iter().collect();
        assert_eq!(
            hub::messages("my-device", &bag),
            "devices/my-device/messages/events/?agps=get"
        );
        assert_eq!(
            hub::batch("my-device"),
            "devices/my-device/messages/events/batch"
        );
    }

    #[test]
    fn hub_assistance_topics_are_device_scoped() {
        assert_eq!(hub::agps("my-device"), "my-device/agps");
        assert_eq!(hub::pgps("my-device"), "my-device/pgps");
    }

    #[test]
    fn hub_username_announces_model() {
        assert_eq!(
            hub::username(
                "hub.azure-devices.net",
                "my-device",
                "dtmi:AzureDeviceUpdate;1"
            ),
            "hub.azure-devices.net/my-device/?api-version=2020-09-30&model-id=dtmi:AzureDeviceUpdate;1"
        );
    }
}
