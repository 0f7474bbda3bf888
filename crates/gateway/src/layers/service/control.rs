use crate::context::ServiceContext;
use crate::layers::service::store_forward::{MessageProcessor, SubjectReport};
use anyhow::Context;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::control::{ControlRequest, ControlResponse, GatewayStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

const MAX_REPORT_LIMIT: usize = 1000;

#[derive(Clone)]
struct ControlState {
    messages: Arc<MessageProcessor>,
    context: Arc<ServiceContext>,
}

/// Binds the operator socket and serves `ControlRequest`s until `shutdown` fires.
pub async fn spawn_control_server(
    addr: &str,
    messages: Arc<MessageProcessor>,
    context: Arc<ServiceContext>,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control addr {addr}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(event = "control.listener.bound", addr = %local_addr);
    let state = ControlState { messages, context };
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.cancelled() => break,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        tracing::info!(event = "control.conn.accepted", peer = %peer);
                        if let Err(err) = handle_control_connection(stream, peer, state).await {
                            tracing::warn!(
                                event = "control.conn.error",
                                peer = %peer,
                                error = %err,
                                "control connection failed"
                            );
                        }
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        event = "control.listener.accept_failed",
                        error = %err,
                        "control listener accept failed"
                    );
                }
            }
        }
        tracing::info!(event = "control.listener.stopped");
    });
    Ok(local_addr)
}

async fn handle_control_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: ControlState,
) -> anyhow::Result<()> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(protocol::framing::MAX_FRAME_LENGTH)
        .new_codec();
    let mut framed = Framed::new(stream, codec);
    while let Some(frame) = framed.next().await {
        let bytes = frame.context("read frame")?;
        let response = match serde_json::from_slice::<ControlRequest>(&bytes) {
            Ok(request) => answer(&state, request),
            Err(err) => {
                tracing::warn!(
                    event = "control.request.invalid",
                    peer = %peer,
                    error = %err,
                    "invalid control request"
                );
                ControlResponse::Error {
                    message: format!("invalid request: {err}"),
                }
            }
        };
        send_response(&mut framed, &response).await?;
    }
    tracing::info!(event = "control.conn.closed", peer = %peer);
    Ok(())
}

fn answer(state: &ControlState, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Status => ControlResponse::Status {
            status: GatewayStatus {
                subjects: state.messages.subject_count(),
                outstanding_commands: state.messages.outstanding_count(),
                locked_down: state.context.is_locked_down(),
            },
        },
        ControlRequest::LatestReports { limit } => ControlResponse::Reports {
            reports: snapshots(state.messages.latest_reports(limit.min(MAX_REPORT_LIMIT))),
        },
        ControlRequest::SubjectReports { host_name, limit } => ControlResponse::Reports {
            reports: snapshots(
                state
                    .messages
                    .latest_reports_from_subject(&host_name, limit.min(MAX_REPORT_LIMIT)),
            ),
        },
        ControlRequest::OutgoingCommands => ControlResponse::OutgoingCommands {
            commands: state.messages.outgoing_commands(),
        },
        ControlRequest::SetOutgoingCommand { host_name, command } => {
            if host_name.trim().is_empty() || command.trim().is_empty() {
                return ControlResponse::Error {
                    message: "host_name and command are required".to_string(),
                };
            }
            state.messages.set_outgoing_command(&host_name, &command);
            ControlResponse::Ack {
                message: format!("outgoing command set for {}", host_name.trim()),
            }
        }
        ControlRequest::ClearOutgoingCommand { host_name } => {
            let message = if state.messages.clear_outgoing_command(&host_name) {
                format!("outgoing command cleared for {}", host_name.trim())
            } else {
                format!("no outgoing command for {}", host_name.trim())
            };
            ControlResponse::Ack { message }
        }
    }
}

fn snapshots(reports: Vec<SubjectReport>) -> Vec<protocol::control::SubjectReportSnapshot> {
    reports.iter().map(SubjectReport::snapshot).collect()
}

async fn send_response(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    response: &ControlResponse,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(response)?;
    framed.send(Bytes::from(payload)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::execution::feature::FeatureSet;
    use crate::layers::execution::processor::CommandProcessor;
    use protocol::config::{ProcessorConfig, StoreAndForwardConfig};
    use protocol::SubjectReportRequest;

    async fn start() -> (SocketAddr, Arc<MessageProcessor>, Arc<ServiceContext>) {
        let context = ServiceContext::new();
        let processor =
            CommandProcessor::new(FeatureSet::new(), context.clone(), &ProcessorConfig::default());
        let messages =
            MessageProcessor::new(Arc::new(processor), &StoreAndForwardConfig::default());
        let addr = spawn_control_server(
            "127.0.0.1:0",
            messages.clone(),
            context.clone(),
            CancellationToken::new(),
        )
        .await
        .expect("bind");
        (addr, messages, context)
    }

    async fn call(
        framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
        request: &ControlRequest,
    ) -> ControlResponse {
        let payload = serde_json::to_vec(request).expect("encode");
        framed.send(Bytes::from(payload)).await.expect("send");
        let frame = framed.next().await.expect("frame").expect("frame");
        serde_json::from_slice(&frame).expect("decode")
    }

    #[tokio::test]
    async fn reports_status_and_reports() {
        let (addr, messages, context) = start().await;
        messages
            .store_report(
                SubjectReportRequest {
                    subject_host_name: "edge-01".to_string(),
                    subject_comment: "disk ok".to_string(),
                    ..Default::default()
                },
                "10.0.0.9",
                "test",
            )
            .expect("store");
        context.engage_lockdown();

        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        let ControlResponse::Status { status } = call(&mut framed, &ControlRequest::Status).await
        else {
            panic!("expected status");
        };
        assert_eq!(status.subjects, 1);
        assert!(status.locked_down);

        let ControlResponse::Reports { reports } =
            call(&mut framed, &ControlRequest::LatestReports { limit: 5 }).await
        else {
            panic!("expected reports");
        };
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].request.subject_comment, "disk ok");
        assert_eq!(reports[0].daemon_name, "test");
    }

    #[tokio::test]
    async fn manages_outgoing_commands() {
        let (addr, messages, _) = start().await;
        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let response = call(
            &mut framed,
            &ControlRequest::SetOutgoingCommand {
                host_name: "edge-01".to_string(),
                command: "verysecret .s uptime".to_string(),
            },
        )
        .await;
        assert!(matches!(response, ControlResponse::Ack { .. }));
        assert_eq!(messages.outgoing_commands().len(), 1);

        let ControlResponse::OutgoingCommands { commands } =
            call(&mut framed, &ControlRequest::OutgoingCommands).await
        else {
            panic!("expected commands");
        };
        assert_eq!(
            commands.get("edge-01").map(String::as_str),
            Some("verysecret .s uptime")
        );

        call(
            &mut framed,
            &ControlRequest::ClearOutgoingCommand {
                host_name: "EDGE-01".to_string(),
            },
        )
        .await;
        assert!(messages.outgoing_commands().is_empty());

        let response = call(
            &mut framed,
            &ControlRequest::SetOutgoingCommand {
                host_name: " ".to_string(),
                command: "x".to_string(),
            },
        )
        .await;
        assert!(matches!(response, ControlResponse::Error { .. }));
    }
}
