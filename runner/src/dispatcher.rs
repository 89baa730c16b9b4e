//! The RPC dispatch loop over the host stream.
//!
//! One task reads frames strictly in arrival order; command handlers are
//! spawned so a slow `train` never starves a `cancel-train` or a data
//! delivery behind it. One writer task drains the outbound queue, so
//! replies and events may hit the stream in any order relative to each
//! other.

use std::{any::Any, io, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use framing::{Call, CommandEnvelope, ErrBody, EvalOutputMeta, Event, Inbound, Outbound, Reply};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use crate::{
    error::{Result, RunnerErr},
    lifecycle::ModelRuntime,
    link::HostLink,
    model::ProgramLoader,
};

/// Longest diagnostic text an exception reply may carry.
const MAX_DIAGNOSTIC_CHARS: usize = 10_000;

/// Runs the child side of the protocol until the host hangs up.
///
/// # Arguments
/// * `rx` - The reading half of the duplex host stream.
/// * `tx` - The writing half of the duplex host stream.
/// * `loader` - Builds the user program when `initialize` arrives.
///
/// # Returns
/// `Ok(())` on a clean host hang-up.
///
/// # Errors
/// Any stream-level I/O failure or malformed frame is fatal and surfaces
/// here; there is no reconnect policy at this layer.
pub async fn serve<R, W, L>(rx: R, tx: W, loader: L) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    L: ProgramLoader,
{
    let (mut frame_rx, mut frame_tx) = framing::channel(rx, tx);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let link = Arc::new(HostLink::new(out_tx));
    let runtime = Arc::new(ModelRuntime::new(link.clone()));

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            frame_tx.send(&frame).await?;
        }
        Ok::<(), io::Error>(())
    });

    loop {
        let frame = match frame_rx.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("host closed the stream, shutting down");
                break;
            }
            Err(e) => {
                error!("fatal stream error: {e}");
                writer.abort();
                return Err(e);
            }
        };

        match frame {
            Inbound::Delivery {
                request_id,
                segments,
            } => link.resolve(request_id, segments),
            Inbound::Command(body) => {
                let envelope: CommandEnvelope = serde_json::from_slice(&body).map_err(|e| {
                    error!("malformed command envelope: {e}");
                    writer.abort();
                    io::Error::new(io::ErrorKind::InvalidData, e)
                })?;
                dispatch(&runtime, &link, &loader, envelope);
            }
        }
    }

    // Let in-flight handlers finish and the writer flush what they queued;
    // the queue closes once the last link clone drops. Outstanding data
    // requests are failed first so no handler waits on the dead host.
    link.hangup();
    drop(runtime);
    drop(link);
    writer.await.unwrap_or(Ok(()))
}

fn dispatch<L: ProgramLoader>(
    runtime: &Arc<ModelRuntime>,
    link: &Arc<HostLink>,
    loader: &L,
    envelope: CommandEnvelope,
) {
    let id = envelope.id;
    debug!("dispatching command: method={} id={id:?}", method_name(&envelope.call));

    // The startup outcome rides an event, never a reply.
    if let Call::Initialize { path } = envelope.call {
        let error = match loader
            .load(&path)
            .and_then(|program| runtime.install_program(program))
        {
            Ok(()) => None,
            Err(e) => {
                warn!("module initialization failed: {e}");
                Some(truncate_diagnostic(&e.to_string()))
            }
        };
        let _ = link.send_event(&Event::ModuleInitialized { error }, Vec::new());
        return;
    }

    let runtime = runtime.clone();
    let link = link.clone();
    tokio::spawn(async move {
        let method = method_name(&envelope.call);
        let outcome = AssertUnwindSafe(execute(&runtime, envelope.call, id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RunnerErr::Exception(panic_text(panic))));

        let Some(id) = id else {
            if let Err(e) = outcome {
                warn!("fire-and-forget command failed: method={method} err={e}");
            }
            return;
        };

        let segments = match outcome {
            Ok(Completion::Empty) => reply_segments(Reply {
                id,
                result: None,
                error: None,
            }),
            Ok(Completion::Evaluated { outputs, payload }) => {
                let mut segments = reply_segments(Reply {
                    id,
                    result: Some(serde_json::json!({ "outputs": outputs })),
                    error: None,
                });
                segments.push(payload);
                segments
            }
            Err(e) => reply_segments(Reply {
                id,
                result: None,
                error: Some(ErrBody::new(
                    e.code(),
                    Some(truncate_diagnostic(&e.to_string())),
                )),
            }),
        };

        if link.send_message(segments).is_err() {
            debug!("dropping reply, the stream writer is gone: id={id}");
        }
    });
}

enum Completion {
    Empty,
    Evaluated {
        outputs: Vec<EvalOutputMeta>,
        payload: Vec<u8>,
    },
}

async fn execute(
    runtime: &ModelRuntime,
    call: Call,
    command_id: Option<u64>,
) -> Result<Completion> {
    match call {
        // Handled at the stream layer before handlers are spawned.
        Call::Initialize { .. } => Err(RunnerErr::Protocol(
            "initialize does not reach the handler layer".to_string(),
        )),
        Call::CreateState {
            id,
            params,
            other_artifacts,
        } => {
            runtime.create_state(&id, params, other_artifacts).await?;
            Ok(Completion::Empty)
        }
        Call::Instantiate {
            id,
            instantiated_id,
            artifact,
            other_artifacts,
        } => {
            runtime
                .instantiate(&id, instantiated_id, artifact, other_artifacts)
                .await?;
            Ok(Completion::Empty)
        }
        Call::Dispose { instantiated_id } => {
            runtime.dispose(&instantiated_id).await;
            Ok(Completion::Empty)
        }
        Call::Train {
            training_session_id,
            instantiated_id,
            params,
        } => {
            runtime
                .train(training_session_id, &instantiated_id, params)
                .await?;
            Ok(Completion::Empty)
        }
        Call::CancelTrain {
            training_session_id,
        } => {
            runtime.cancel_train(&training_session_id);
            Ok(Completion::Empty)
        }
        Call::Evaluate {
            instantiated_id,
            params,
        } => {
            let (outputs, payload) = runtime.evaluate(&instantiated_id, params).await?;
            Ok(Completion::Evaluated { outputs, payload })
        }
        Call::GetState {
            id,
            instantiated_id,
        } => {
            // Exported state is correlated to this command by its id, so a
            // fire-and-forget get-state has nowhere to deliver to.
            let command_id = command_id.ok_or_else(|| {
                RunnerErr::InvalidArgument("get-state requires a command id".to_string())
            })?;
            runtime.get_state(&id, &instantiated_id, command_id).await?;
            Ok(Completion::Empty)
        }
    }
}

fn reply_segments(reply: Reply) -> Vec<Vec<u8>> {
    // Serializing the derived `Reply` cannot fail, it holds no
    // non-string-key maps.
    vec![serde_json::to_vec(&reply).unwrap()]
}

/// Caps diagnostic text, noting how many characters were cut.
fn truncate_diagnostic(text: &str) -> String {
    let total = text.chars().count();
    if total <= MAX_DIAGNOSTIC_CHARS {
        return text.to_string();
    }

    let mut out: String = text.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    out.push_str(&format!(" [{} characters elided]", total - MAX_DIAGNOSTIC_CHARS));
    out
}

fn panic_text(panic: Box<dyn Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("handler panicked: {text}")
    } else {
        "handler panicked".to_string()
    }
}

fn method_name(call: &Call) -> &'static str {
    match call {
        Call::Initialize { .. } => "initialize",
        Call::CreateState { .. } => "create-state",
        Call::Instantiate { .. } => "instantiate",
        Call::Dispose { .. } => "dispose",
        Call::Train { .. } => "train",
        Call::CancelTrain { .. } => "cancel-train",
        Call::Evaluate { .. } => "evaluate",
        Call::GetState { .. } => "get-state",
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_diagnostics_pass_through() {
        assert_eq!(truncate_diagnostic("boom"), "boom");
    }

    #[test]
    fn long_diagnostics_note_the_elided_count() {
        let text = "x".repeat(MAX_DIAGNOSTIC_CHARS + 234);
        let capped = truncate_diagnostic(&text);

        assert!(capped.starts_with(&"x".repeat(MAX_DIAGNOSTIC_CHARS)));
        assert!(capped.ends_with("[234 characters elided]"));
        assert_eq!(
            capped.chars().filter(|&c| c == 'x').count(),
            MAX_DIAGNOSTIC_CHARS
        );
    }
}
