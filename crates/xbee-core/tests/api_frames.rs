//! API frame exchanges against a scripted transport

use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xbee_core::params::{pan_id_value, ParameterMap, ParameterValue};
use xbee_core::protocol::frame::{checksum, decode, encode};
use xbee_core::protocol::{
    decode_frame, send_raw_frame, send_request_receive_response, ApiClient, ApiMode, Frame,
    FrameType, MockTransport, ProtocolConfig, ProtocolError, TraceEvent,
};

fn fast_config() -> ProtocolConfig {
    ProtocolConfig {
        read_timeout_ms: 40,
        ..ProtocolConfig::default()
    }
}

fn response(
    frame_id: u8,
    command: &[u8; 2],
    status: u8,
    parameter: &[u8],
    mode: ApiMode,
) -> Vec<u8> {
    Frame {
        frame_type: FrameType::AtCommandResponse,
        frame_id,
        command: *command,
        status: Some(status),
        parameter: parameter.to_vec(),
    }
    .to_bytes(mode)
    .unwrap()
}

fn modem_status(status: u8) -> Vec<u8> {
    Frame {
        frame_type: FrameType::ModemStatus,
        frame_id: 0,
        command: [0, 0],
        status: Some(status),
        parameter: Vec::new(),
    }
    .to_bytes(ApiMode::Unescaped)
    .unwrap()
}

#[test]
fn test_pan_id_request_bytes() {
    let bytes = encode(0x01, *b"ID", None, ApiMode::Unescaped).unwrap();
    assert_eq!(bytes, vec![0x7E, 0x00, 0x04, 0x08, 0x01, 0x49, 0x44, 0x69]);
    assert_eq!(checksum(&bytes[3..7]), 0x69);
}

#[test]
fn test_read_and_write_pan_id() {
    let mut mock = MockTransport::new();
    mock.queue_reply(response(1, b"ID", 0, &[0x12, 0x34], ApiMode::Unescaped))
        .queue_reply(response(2, b"ID", 0, &[], ApiMode::Unescaped))
        .queue_reply(response(3, b"WR", 0, &[], ApiMode::Unescaped));

    let mut client = ApiClient::new(mock, fast_config()).with_parameters(ParameterMap::common());

    let current = client.read_parameter("ID").unwrap();
    assert_eq!(
        current,
        ParameterValue::UnsignedInteger {
            width: 2,
            value: 0x1234
        }
    );
    assert_eq!(current.to_string(), "1234");

    client
        .write_parameter("ID", &pan_id_value("ABCD").unwrap())
        .unwrap();
    client.write_to_flash().unwrap();

    let mock = client.into_inner();
    let set = decode(&mock.written()[1], ApiMode::Unescaped).unwrap();
    assert_eq!(set.frame_id, 2);
    assert_eq!(set.command, *b"ID");
    assert_eq!(set.parameter, vec![0xAB, 0xCD]);
    assert_eq!(mock.written().len(), 3);
}

#[test]
fn test_error_status_ignores_parameter() {
    let mut mock = MockTransport::new();
    mock.queue_reply(response(1, b"ID", 0x01, &[0x12, 0x34], ApiMode::Unescaped));

    let mut client = ApiClient::new(mock, fast_config()).with_parameters(ParameterMap::common());
    let err = client.read_parameter("ID").unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::DeviceStatus { status: 0x01, .. }
    ));
    assert!(err.to_string().contains("ERROR"));
}

#[test]
fn test_modem_status_before_response_is_skipped() {
    let mut reply = modem_status(0x06);
    reply.extend(response(1, b"VR", 0, &[0x10, 0xA5], ApiMode::Unescaped));
    let mut mock = MockTransport::new();
    mock.queue_reply(reply);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut client = ApiClient::new(mock, fast_config())
        .with_parameters(ParameterMap::common())
        .with_observer(move |event: &TraceEvent| sink.lock().unwrap().push(event.clone()));

    assert_eq!(client.read_parameter("VR").unwrap().as_u64(), Some(0x10A5));
    assert!(events
        .lock()
        .unwrap()
        .contains(&TraceEvent::FrameSkipped { frame_type: 0x8A }));
}

#[test]
fn test_wrong_frame_id_is_correlation_error() {
    let mut mock = MockTransport::new();
    mock.queue_reply(response(9, b"ID", 0, &[0x01], ApiMode::Unescaped));

    let result = send_request_receive_response(
        &mut mock,
        1,
        "ID",
        None,
        ApiMode::Unescaped,
        Duration::from_millis(40),
    );
    assert!(matches!(
        result,
        Err(ProtocolError::Correlation {
            expected_id: 1,
            actual_id: 9,
            ..
        })
    ));
}

#[test]
fn test_silent_device_times_out() {
    let mut mock = MockTransport::new();
    mock.queue_silence();

    let mut client = ApiClient::new(mock, fast_config());
    assert!(matches!(
        client.read_parameter("ID"),
        Err(ProtocolError::TruncatedRead { received: 0, .. })
    ));
}

#[test]
fn test_escaped_mode_exchange() {
    // 0x11 and 0x7E in the parameter must travel escaped
    let mut mock = MockTransport::new();
    mock.queue_reply(response(1, b"DL", 0, &[0x00, 0x11, 0x7E, 0x13], ApiMode::Escaped));
    let config = ProtocolConfig {
        api_mode: ApiMode::Escaped,
        ..fast_config()
    };

    let mut client = ApiClient::new(mock, config).with_parameters(ParameterMap::common());
    assert_eq!(client.read_parameter("DL").unwrap().as_u64(), Some(0x00117E13));
}

#[test]
fn test_raw_frame_helpers() {
    let mut mock = MockTransport::new();
    mock.queue_reply(response(7, b"CH", 0, &[0x0C], ApiMode::Unescaped));

    let request = Frame::at_command(7, *b"CH", &[]);
    let sent = send_raw_frame(&mut mock, &request, ApiMode::Unescaped).unwrap();
    assert_eq!(decode(&sent, ApiMode::Unescaped).unwrap(), request);

    let reply = decode_frame(&mut mock, ApiMode::Unescaped, Duration::from_millis(40)).unwrap();
    assert!(reply.is_at_response());
    assert_eq!(reply.frame_id, 7);
    assert_eq!(reply.parameter, vec![0x0C]);
}
