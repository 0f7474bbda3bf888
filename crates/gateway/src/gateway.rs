use crate::context::ServiceContext;
use crate::layers::execution::feature::FeatureSet;
use crate::layers::execution::features::env::EnvControl;
use crate::layers::execution::features::shell::ShellFeature;
use crate::layers::execution::filters::lint::LintText;
use crate::layers::execution::filters::notify::{MailSender, NotifyViaEmail, SendmailSender};
use crate::layers::execution::filters::ResultFilter;
use crate::layers::execution::processor::CommandProcessor;
use crate::layers::policy::auth::PinAndShortcuts;
use crate::layers::policy::config::validate_config;
use crate::layers::policy::translate::TranslateSequences;
use crate::layers::policy::CommandFilter;
use crate::layers::service::control::spawn_control_server;
use crate::layers::service::server::spawn_command_server;
use crate::layers::service::store_forward::{MessageProcessor, MessageProcessorFeature};
use protocol::config::{DaemonConfig, GatewayConfig};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A fully wired gateway: features, processors and the store-and-forward state.
pub struct Gateway {
    context: Arc<ServiceContext>,
    processor: Arc<CommandProcessor>,
    messages: Arc<MessageProcessor>,
    daemon: DaemonConfig,
    shutdown: CancellationToken,
}

impl Gateway {
    pub async fn build(config: &GatewayConfig) -> anyhow::Result<Self> {
        Self::build_with_mailer(config, None).await
    }

    /// Like `build`, with notifications handed to `mailer` instead of sendmail.
    pub async fn build_with_mailer(
        config: &GatewayConfig,
        mailer: Option<Arc<dyn MailSender>>,
    ) -> anyhow::Result<Self> {
        validate_config(config)?;
        let context = ServiceContext::new();

        let mut features = FeatureSet::new();
        features
            .register(Arc::new(ShellFeature::new(&config.features.shell)))
            .await?;
        features
            .register(Arc::new(EnvControl::new(Arc::clone(&context))))
            .await?;

        let command_filters = vec![
            CommandFilter::PinAndShortcuts(PinAndShortcuts::new(
                &config.auth,
                Arc::clone(&context),
            )),
            CommandFilter::Translate(TranslateSequences::new(&config.processor.translate)),
        ];

        // Subject-requested commands never reach the store-and-forward feature.
        let embedded = command_filters.iter().cloned().fold(
            CommandProcessor::new(features.clone(), Arc::clone(&context), &config.processor),
            CommandProcessor::with_command_filter,
        );
        let messages = MessageProcessor::new(Arc::new(embedded), &config.store_and_forward);
        features
            .register(Arc::new(MessageProcessorFeature::new(Arc::clone(&messages))))
            .await?;

        let mut processor = command_filters.into_iter().fold(
            CommandProcessor::new(features, Arc::clone(&context), &config.processor),
            CommandProcessor::with_command_filter,
        );
        if let Some(lint) = &config.lint {
            processor = processor.with_result_filter(ResultFilter::Lint(LintText::from(lint)));
        }
        processor = processor.with_result_filter(ResultFilter::SayEmptyOutput);
        if let Some(notify) = &config.notify {
            let sender = mailer
                .unwrap_or_else(|| Arc::new(SendmailSender::new(notify)) as Arc<dyn MailSender>);
            processor = processor.with_result_filter(ResultFilter::Notify(NotifyViaEmail::spawn(
                notify.recipients.clone(),
                sender,
            )));
        }
        tracing::info!(
            event = "gateway.built",
            triggers = ?processor.features().triggers()
        );

        Ok(Self {
            context,
            processor: Arc::new(processor),
            messages,
            daemon: config.daemon.clone(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }

    pub fn messages(&self) -> &Arc<MessageProcessor> {
        &self.messages
    }

    /// Self test failures keyed by trigger; empty when everything passed.
    pub async fn self_test(&self) -> BTreeMap<&'static str, String> {
        self.processor.features().self_test_all().await
    }

    /// Starts the command and control listeners and returns their bound addresses.
    pub async fn serve(
        &self,
        listen_addr: &str,
        control_addr: &str,
    ) -> anyhow::Result<(SocketAddr, SocketAddr)> {
        let command = spawn_command_server(
            listen_addr,
            Arc::clone(&self.processor),
            &self.daemon,
            self.shutdown.clone(),
        )
        .await?;
        let control = spawn_control_server(
            control_addr,
            Arc::clone(&self.messages),
            Arc::clone(&self.context),
            self.shutdown.clone(),
        )
        .await?;
        Ok((command, control))
    }

    /// Serves on the configured addresses until ctrl-c.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listen_addr = self.daemon.listen_addr.clone();
        let control_addr = self.daemon.control_addr.clone();
        self.serve(&listen_addr, &control_addr).await?;
        tokio::signal::ctrl_c().await?;
        tracing::info!(event = "gateway.shutdown_requested");
        self.shutdown().await;
        Ok(())
    }

    /// Stops the listeners and waits for background store-and-forward commands.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.messages.shutdown().await;
        tracing::info!(event = "gateway.stopped");
    }
}
