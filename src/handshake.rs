use crate::error::{Result, WebOsError};
use crate::protocol::{Request, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const MANIFEST_SIGNATURE: &str = "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw==";

/// Result of a successful registration
#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub client_key: String,
    /// True when the TV issued a key different from the one we sent
    pub newly_paired: bool,
    pub hello_info: Option<Value>,
}

/// Registration payload with the signed permission manifest
pub(crate) fn registration_payload(client_key: Option<&str>) -> Value {
    let mut payload = json!({
        "forcePairing": false,
        "pairingType": "PROMPT",
        "manifest": {
            "manifestVersion": 1,
            "appVersion": "1.1",
            "signed": {
                "created": "20140509",
                "appId": "com.lge.test",
                "vendorId": "com.lge",
                "localizedAppNames": {
                    "": "LG Remote App",
                },
                "localizedVendorNames": {
                    "": "LG Electronics",
                },
                "permissions": [
                    "TEST_SECURE",
                    "CONTROL_INPUT_TEXT",
                    "CONTROL_MOUSE_AND_KEYBOARD",
                    "READ_INSTALLED_APPS",
                    "READ_LGE_SDX",
                    "READ_NOTIFICATIONS",
                    "SEARCH",
                    "WRITE_SETTINGS",
                    "WRITE_NOTIFICATION_ALERT",
                    "CONTROL_POWER",
                    "READ_CURRENT_CHANNEL",
                    "READ_RUNNING_APPS",
                    "READ_UPDATE_INFO",
                    "UPDATE_FROM_REMOTE_APP",
                    "READ_LGE_TV_INPUT_EVENTS",
                    "READ_TV_CURRENT_TIME",
                ],
                "serial": "2f930e2d2cfe083771f68e4fe7bb07",
            },
            "permissions": [
                "LAUNCH",
                "LAUNCH_WEBAPP",
                "APP_TO_APP",
                "CLOSE",
                "TEST_OPEN",
                "TEST_PROTECTED",
                "CONTROL_AUDIO",
                "CONTROL_DISPLAY",
                "CONTROL_INPUT_JOYSTICK",
                "CONTROL_INPUT_MEDIA_RECORDING",
                "CONTROL_INPUT_MEDIA_PLAYBACK",
                "CONTROL_INPUT_TV",
                "CONTROL_POWER",
                "CONTROL_TV_SCREEN",
                "CONTROL_TV_STANBY",
                "READ_APP_STATUS",
                "READ_CURRENT_CHANNEL",
                "READ_INPUT_DEVICE_LIST",
                "READ_NETWORK_STATE",
                "READ_RUNNING_APPS",
                "READ_TV_CHANNEL_LIST",
                "READ_POWER_STATE",
                "READ_COUNTRY_INFO",
                "READ_SETTINGS",
                "READ_TV_PROGRAM_INFO",
                "READ_TV_CURRENT_TIME",
                "WRITE_NOTIFICATION_TOAST",
                "CONTROL_TV_POWER",
                "CONTROL_WOL",
            ],
            "signatures": [
                {
                    "signatureVersion": 1,
                    "signature": MANIFEST_SIGNATURE,
                },
            ],
        },
    });

    if let (Some(key), Some(obj)) = (client_key, payload.as_object_mut()) {
        obj.insert("client-key".to_string(), Value::from(key));
    }
    payload
}

/// Read the next text frame, skipping control frames
async fn recv_frame<S>(ws: &mut WebSocketStream<S>) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                tracing::debug!("Handshake received: {}", text);
                return Response::parse(&text);
            }
            Message::Close(_) => return Err(WebOsError::ConnectionClosed),
            _ => {}
        }
    }
    Err(WebOsError::ConnectionClosed)
}

async fn send_frame<S>(ws: &mut WebSocketStream<S>, request: &Request) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = request.to_text()?;
    tracing::debug!("Handshake sending: {}", text);
    ws.send(Message::Text(text)).await?;
    Ok(())
}

/// Run the optional hello probe and the registration exchange
///
/// When the TV answers with a pairing prompt this waits for the user to
/// accept on screen; there is no timeout on that step.
pub(crate) async fn register<S>(
    ws: &mut WebSocketStream<S>,
    client_key: Option<&str>,
    hello_probe: bool,
) -> Result<Registration>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello_info = if hello_probe {
        send_frame(ws, &Request::hello()).await?;
        let response = recv_frame(ws).await?;
        if response.frame_type != "hello" {
            return Err(WebOsError::Pairing("unable to say hello".to_string()));
        }
        response.payload
    } else {
        None
    };

    send_frame(ws, &Request::register(registration_payload(client_key))).await?;

    let mut response = recv_frame(ws).await?;
    let prompted = response.frame_type == "response"
        && response
            .payload
            .as_ref()
            .and_then(|p| p.get("pairingType"))
            .and_then(Value::as_str)
            == Some("PROMPT");
    if prompted {
        tracing::info!("Waiting for the pairing prompt to be accepted on the TV");
        response = recv_frame(ws).await?;
    }

    let mut key = client_key.map(str::to_string);
    let mut newly_paired = false;

    match response.frame_type.as_str() {
        "registered" => {
            let issued = response
                .payload
                .as_ref()
                .and_then(|p| p.get("client-key"))
                .and_then(Value::as_str);
            if let Some(issued) = issued {
                if key.as_deref() != Some(issued) {
                    key = Some(issued.to_string());
                    newly_paired = true;
                }
            }
        }
        "error" => {
            return Err(WebOsError::Pairing(
                response
                    .error
                    .unwrap_or_else(|| "registration rejected".to_string()),
            ));
        }
        other => tracing::debug!("Unexpected registration reply type {:?}", other),
    }

    match key {
        Some(client_key) if !client_key.is_empty() => Ok(Registration {
            client_key,
            newly_paired,
            hello_info,
        }),
        _ => Err(WebOsError::Pairing("unable to pair".to_string())),
    }
}
