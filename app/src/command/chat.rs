//! Conversation command.
//!
//! Single-message mode runs one cycle and prints the model turn. Interactive
//! mode keeps reading stdin while a request is in flight, so input typed
//! during a request hits the busy guard and is kept as a draft instead of
//! being sent.

use std::sync::Arc;

use parley_config::Config;
use parley_core::{IdentityProvider, TokenIdentitySource, Transport};
use parley_providers::GeminiTransport;
use parley_session::{Completion, CompletionFuture, Rejected, SessionController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::render::Renderer;

/// Input parameters for the Chat command strategy.
#[derive(Debug, Clone)]
pub struct ChatInput {
    /// Optional single message to send (non-interactive mode)
    pub message: Option<String>,
    /// Optional endpoint override
    pub endpoint: Option<String>,
    /// Optional identity token override
    pub identity_token: Option<String>,
}

/// Strategy for executing the Chat command.
#[derive(Debug, Clone, Copy)]
pub struct ChatStrategy;

impl super::CommandStrategy for ChatStrategy {
    type Input = ChatInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let mut config = Config::load()?;
        if let Some(endpoint) = input.endpoint {
            config.service.endpoint = endpoint;
        }
        if let Some(token) = input.identity_token {
            config.identity.token = Some(token);
        }

        let session_config = config.session_config();
        let transport = GeminiTransport::new(
            session_config.service_endpoint.clone(),
            config.service.timeout(),
        )?
        .with_api_key(config.service.api_key.clone());

        let mut controller = SessionController::new(Arc::new(transport), session_config);

        // Identity is decorative: bootstrap it in the background.
        let identity = IdentityProvider::new();
        let source = TokenIdentitySource::new(controller.config().identity_token.clone());
        let bootstrap = identity.clone();
        tokio::spawn(async move {
            bootstrap.bootstrap(&source).await;
        });

        if let Some(msg) = input.message {
            match controller.submit(&msg).await {
                Ok(outcome) => println!("{}", outcome.turn().text()),
                Err(Rejected::EmptyInput) => anyhow::bail!("Message is empty, nothing to send"),
                Err(e) => return Err(e.into()),
            }
        } else {
            run_interactive(&mut controller, &identity).await?;
        }

        info!(
            "Conversation ended: {} turns",
            controller.transcript().len()
        );
        Ok(())
    }
}

async fn run_interactive<T>(
    controller: &mut SessionController<T>,
    identity: &IdentityProvider,
) -> anyhow::Result<()>
where
    T: Transport + ?Sized + 'static,
{
    let mut renderer = Renderer::new();
    let mut identity_updates = identity.subscribe();
    let mut identity_shown = false;

    renderer.header(controller.config());
    if let Some(current) = identity.current() {
        renderer.identity(&current);
        identity_shown = true;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: Option<CompletionFuture> = None;
    renderer.prompt()?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if matches!(line.trim(), "exit" | "quit" | "q") {
                    break;
                }

                let resending_draft = line.trim().is_empty();
                if !resending_draft {
                    // Lines typed during one request accumulate into a single draft.
                    let draft = if controller.is_busy() {
                        extend_draft(&controller.snapshot().pending_input, line)
                    } else {
                        line
                    };
                    controller.set_pending_input(draft);
                }
                let draft = controller.snapshot().pending_input;

                match controller.submit_pending() {
                    Ok(request) => {
                        if resending_draft {
                            renderer.notice(&format!("sending draft: {draft}"));
                        }
                        renderer.skip_to(&controller.snapshot());
                        in_flight = Some(controller.dispatch(request));
                        renderer.thinking()?;
                    }
                    Err(Rejected::Busy) => {
                        renderer.notice(
                            "still waiting for the previous reply; added your message to the draft",
                        );
                    }
                    Err(Rejected::EmptyInput) => renderer.prompt()?,
                }
            }
            completion = next_completion(&mut in_flight) => {
                in_flight = None;
                controller.resolve(completion)?;

                let snapshot = controller.snapshot();
                renderer.render_new(&snapshot);
                if !snapshot.pending_input.is_empty() {
                    renderer.notice("press Enter on an empty line to send your draft");
                }
                renderer.prompt()?;
            }
            update = identity_updates.changed(), if !identity_shown => {
                if let Some(current) = update {
                    renderer.identity(&current);
                }
                identity_shown = true;
            }
        }
    }

    // Requests are never cancelled: let the last one land before leaving.
    if let Some(pending) = in_flight.take() {
        renderer.notice("waiting for the reply before exiting");
        let completion = pending.await;
        controller.resolve(completion)?;
        renderer.render_new(&controller.snapshot());
    }

    renderer.summary(&controller.snapshot());
    Ok(())
}

async fn next_completion(in_flight: &mut Option<CompletionFuture>) -> Completion {
    match in_flight {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

fn extend_draft(draft: &str, line: String) -> String {
    if draft.is_empty() {
        line
    } else {
        format!("{draft}\n{line}")
    }
}
