mod config;

use std::{path::PathBuf, sync::Arc};

use futures_util::stream::StreamExt;
use judge_core::{
    handler::{JudgeHandler, JudgeRequest, JudgeResult},
    judge::Judger,
    language::LanguageConfig,
    sandbox::SandboxExecutor,
    testcase::DirectoryTestcaseStore,
};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use log::{error, info, warn};
use tokio::{sync::Semaphore, task::JoinError};
use tokio_amqp::*;

use crate::config::{Result, ServerConfig};

fn build_handler(config: &ServerConfig) -> Result<JudgeHandler> {
    let languages = match &config.languages {
        Some(path) => LanguageConfig::from_file(path)?,
        None => LanguageConfig::default(),
    };
    let languages = Arc::new(languages);
    for (name, status) in languages.check_environment() {
        info!("server: {} {:?}", name, status);
    }

    let judger = Judger::with_sandbox(
        Arc::new(SandboxExecutor::new()),
        languages.clone(),
        config.workers,
        config.log_dir.clone(),
    );
    let mut handler = JudgeHandler::new(judger, languages, &config.base_dir);
    if let Some(dir) = &config.testcase_dir {
        handler = handler.with_store(Arc::new(DirectoryTestcaseStore::new(dir)));
    }
    Ok(handler)
}

/// The reply for a finished judging job, an internal error when it panicked.
fn settle(joined: std::result::Result<JudgeResult, JoinError>, submission_id: &str) -> JudgeResult {
    joined.unwrap_or_else(|err| {
        error!("server: judging {} panicked: {}", submission_id, err);
        JudgeResult::internal_error()
    })
}

/// Judge one delivery, publish its result and ack it.
///
/// Undecodable messages are acked without a reply so they never come back.
/// A delivery whose result could not be published is requeued.
async fn process(
    handler: Arc<JudgeHandler>,
    channel: Channel,
    result_queue: String,
    delivery: Delivery,
) -> lapin::Result<()> {
    let request: JudgeRequest = match serde_json::from_slice(&delivery.data) {
        Ok(request) => request,
        Err(err) => {
            warn!("server: dropping malformed request: {}", err);
            return delivery.ack(BasicAckOptions::default()).await;
        }
    };
    let submission_id = request.submission_id.clone();
    info!("server: received submission {}", submission_id);

    let joined = tokio::task::spawn_blocking(move || handler.handle(request)).await;
    let result = settle(joined, &submission_id);

    match result.to_json() {
        Ok(payload) => {
            if let Err(err) = publish(&channel, &result_queue, payload).await {
                error!("server: cannot publish result of {}: {}", submission_id, err);
                let requeue = BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                };
                return delivery.nack(requeue).await;
            }
            info!(
                "server: published {} ({:?})",
                submission_id, result.status_code
            );
        }
        Err(err) => error!("server: cannot encode result of {}: {}", submission_id, err),
    }

    delivery.ack(BasicAckOptions::default()).await
}

async fn publish(channel: &Channel, queue: &str, payload: String) -> lapin::Result<()> {
    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            payload.into_bytes(),
            BasicProperties::default(),
        )
        .await?
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;
    let handler = Arc::new(build_handler(&config)?);

    let conn =
        Connection::connect(&config.amqp_addr, ConnectionProperties::default().with_tokio()).await?;
    let channel_task = conn.create_channel().await?;
    let channel_result = conn.create_channel().await?;

    for (channel, queue) in [
        (&channel_task, &config.task_queue),
        (&channel_result, &config.result_queue),
    ] {
        let declared = channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await?;
        info!("server: declared queue {:?}", declared);
    }
    let prefetch = u16::try_from(config.max_concurrent_tasks).unwrap_or(u16::MAX);
    channel_task
        .basic_qos(prefetch, BasicQosOptions::default())
        .await?;

    let mut consumer = channel_task
        .basic_consume(
            &config.task_queue,
            &config.consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    info!("server: consuming {}", config.task_queue);

    let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks));
    while let Some(delivery) = consumer.next().await {
        let (_, delivery) = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                error!("server: consumer failed: {}", err);
                break;
            }
        };
        let permit = permits.clone().acquire_owned().await?;
        let handler = handler.clone();
        let channel = channel_result.clone();
        let result_queue = config.result_queue.clone();

        tokio::spawn(async move {
            if let Err(err) = process(handler, channel, result_queue, delivery).await {
                error!("server: {}", err);
            }
            drop(permit);
        });
    }

    Ok(())
}
