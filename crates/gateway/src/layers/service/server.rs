use crate::error::ProcessError;
use crate::layers::execution::command::Command;
use crate::layers::execution::processor::{CommandProcessor, MAX_TIMEOUT_SECS};
use crate::layers::policy::rate_limit::RateLimit;
use anyhow::Context;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::config::DaemonConfig;
use protocol::{GatewayRequest, GatewayResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Daemon name stamped on every command arriving over the TCP transport.
pub const DAEMON_NAME: &str = "tcpd";

struct Transport {
    processor: Arc<CommandProcessor>,
    per_ip: RateLimit,
    silent_on_rejection: bool,
}

/// Binds `addr` and serves length-delimited JSON command frames until `shutdown` fires.
pub async fn spawn_command_server(
    addr: &str,
    processor: Arc<CommandProcessor>,
    config: &DaemonConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind command addr {addr}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(event = "command.listener.bound", addr = %local_addr);
    let transport = Arc::new(Transport {
        processor,
        per_ip: RateLimit::new(1, config.per_ip_max_per_sec),
        silent_on_rejection: config.silent_on_rejection,
    });
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.cancelled() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let transport = Arc::clone(&transport);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, peer, transport, shutdown).await {
                            tracing::warn!(
                                event = "command.conn.error",
                                peer = %peer,
                                error = %err,
                                "command connection failed"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::error!(event = "command.listener.accept_failed", error = %err);
                }
            }
        }
        tracing::info!(event = "command.listener.stopped");
    });
    Ok(local_addr)
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    transport: Arc<Transport>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(protocol::framing::MAX_FRAME_LENGTH)
        .new_codec();
    let mut framed = Framed::new(stream, codec);
    let client_ip = peer.ip().to_string();
    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = shutdown.cancelled() => break,
        };
        let Some(frame) = frame else {
            break;
        };
        let bytes = frame.context("frame read")?;

        if !transport.per_ip.add(&client_ip, true) {
            tracing::info!(event = "command.rate_limited", peer = %peer);
            if transport.silent_on_rejection {
                break;
            }
            send_output(&mut framed, ProcessError::RateLimitExceeded.to_string()).await?;
            continue;
        }

        let request: GatewayRequest = match serde_json::from_slice(&bytes) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(event = "command.request.invalid", peer = %peer, error = %err);
                send_output(&mut framed, "invalid request".to_string()).await?;
                continue;
            }
        };
        let command = Command::new(
            client_ip.clone(),
            DAEMON_NAME,
            request.timeout_secs.unwrap_or(0).min(MAX_TIMEOUT_SECS),
            request.content,
        );
        let result = transport.processor.process(command, true).await;
        let silent = result
            .error
            .as_ref()
            .is_some_and(ProcessError::is_silent_rejection);
        if silent && transport.silent_on_rejection {
            break;
        }
        send_output(&mut framed, result.combined_output).await?;
    }
    Ok(())
}

async fn send_output(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    output: String,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&GatewayResponse { output })?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServiceContext;
    use crate::layers::execution::feature::test_support::EchoFeature;
    use crate::layers::execution::feature::FeatureSet;
    use crate::layers::policy::auth::PinAndShortcuts;
    use crate::layers::policy::CommandFilter;
    use protocol::config::{AuthConfig, ProcessorConfig};

    async fn start(silent_on_rejection: bool, per_ip_max_per_sec: u32) -> (SocketAddr, Arc<ServiceContext>) {
        let context = ServiceContext::new();
        let mut features = FeatureSet::new();
        features
            .register(Arc::new(EchoFeature::new(".s")))
            .await
            .expect("register");
        let auth = AuthConfig {
            passwords: vec!["verysecret".to_string()],
            ..AuthConfig::default()
        };
        let processor = CommandProcessor::new(
            features,
            context.clone(),
            &ProcessorConfig {
                max_cmds_per_sec: 100,
                ..ProcessorConfig::default()
            },
        )
        .with_command_filter(CommandFilter::PinAndShortcuts(PinAndShortcuts::new(
            &auth,
            context.clone(),
        )));
        let config = DaemonConfig {
            per_ip_max_per_sec,
            silent_on_rejection,
            ..DaemonConfig::default()
        };
        let addr = spawn_command_server(
            "127.0.0.1:0",
            Arc::new(processor),
            &config,
            CancellationToken::new(),
        )
        .await
        .expect("bind");
        (addr, context)
    }

    async fn connect(addr: SocketAddr) -> Framed<TcpStream, LengthDelimitedCodec> {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Framed::new(stream, LengthDelimitedCodec::new())
    }

    async fn ask(
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
        content: &str,
    ) -> Option<GatewayResponse> {
        let request = GatewayRequest {
            content: content.to_string(),
            timeout_secs: Some(5),
        };
        let payload = serde_json::to_vec(&request).expect("encode");
        framed.send(Bytes::from(payload)).await.expect("send");
        let frame = framed.next().await?.expect("frame");
        Some(serde_json::from_slice(&frame).expect("decode"))
    }

    #[tokio::test]
    async fn runs_command_over_tcp() {
        let (addr, _) = start(false, 10).await;
        let mut framed = connect(addr).await;
        let response = ask(&mut framed, "verysecret .s hello").await.expect("response");
        assert_eq!(response.output, "hello");
        let response = ask(&mut framed, "nope .s hello").await.expect("response");
        assert_eq!(response.output, "failed to match PIN/shortcut");
    }

    #[tokio::test]
    async fn per_ip_limit_answers_when_not_silent() {
        let (addr, _) = start(false, 1).await;
        let mut framed = connect(addr).await;
        ask(&mut framed, "verysecret .s one").await.expect("response");
        let response = ask(&mut framed, "verysecret .s two").await.expect("response");
        assert_eq!(response.output, ProcessError::RateLimitExceeded.to_string());
    }

    #[tokio::test]
    async fn lockdown_is_silent_when_configured() {
        let (addr, context) = start(true, 10).await;
        context.engage_lockdown();
        let mut framed = connect(addr).await;
        assert!(ask(&mut framed, "verysecret .s hello").await.is_none());
    }

    #[tokio::test]
    async fn huge_timeout_is_clamped() {
        let (addr, _) = start(false, 10).await;
        let mut framed = connect(addr).await;
        let request = GatewayRequest {
            content: "verysecret .s still alive".to_string(),
            timeout_secs: Some(u64::MAX),
        };
        framed
            .send(Bytes::from(serde_json::to_vec(&request).expect("encode")))
            .await
            .expect("send");
        let frame = framed.next().await.expect("frame").expect("frame");
        let response: GatewayResponse = serde_json::from_slice(&frame).expect("decode");
        assert_eq!(response.output, "still alive");
    }

    #[tokio::test]
    async fn invalid_payload_gets_generic_answer() {
        let (addr, _) = start(false, 10).await;
        let mut framed = connect(addr).await;
        framed
            .send(Bytes::from_static(b"not json"))
            .await
            .expect("send");
        let frame = framed.next().await.expect("frame").expect("frame");
        let response: GatewayResponse = serde_json::from_slice(&frame).expect("decode");
        assert_eq!(response.output, "invalid request");
    }
}
