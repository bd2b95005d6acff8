//! AWS Kinesis log source

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_kinesis::types::{ShardIteratorType, StreamStatus as KinesisStatus};
use aws_sdk_kinesis::Client;
use bytes::Bytes;

use super::{LogSource, RecordBatch, SourceError, StartingPosition, StreamDescription, StreamStatus};
use crate::registry::StreamKey;

/// Kinesis client per configured region
#[derive(Debug, Clone)]
pub struct KinesisSource {
    clients: HashMap<String, Client>,
}

impl KinesisSource {
    /// Build one client per region from the ambient AWS configuration
    pub async fn new<I, R>(regions: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        let mut clients = HashMap::new();

        for region in regions {
            let region = region.into();
            if clients.contains_key(&region) {
                continue;
            }

            let config = aws_config::from_env()
                .region(Region::new(region.clone()))
                .load()
                .await;
            tracing::debug!(region = %region, "Kinesis client configured");
            clients.insert(region, Client::new(&config));
        }

        Self { clients }
    }

    /// Regions this source can serve
    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    fn client(&self, region: &str) -> Result<&Client, SourceError> {
        self.clients
            .get(region)
            .ok_or_else(|| SourceError::RegionNotConfigured(region.to_string()))
    }
}

fn kinesis_error(err: impl Into<aws_sdk_kinesis::Error>) -> SourceError {
    SourceError::Kinesis(Box::new(err.into()))
}

fn convert_status(status: &KinesisStatus) -> StreamStatus {
    match status {
        KinesisStatus::Active => StreamStatus::Active,
        KinesisStatus::Creating => StreamStatus::Creating,
        KinesisStatus::Updating => StreamStatus::Updating,
        KinesisStatus::Deleting => StreamStatus::Deleting,
        other => StreamStatus::Other(other.as_str().to_string()),
    }
}

#[async_trait]
impl LogSource for KinesisSource {
    async fn describe_stream(&self, stream: &StreamKey) -> Result<StreamDescription, SourceError> {
        let output = self
            .client(&stream.region)?
            .describe_stream()
            .stream_name(&stream.name)
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    SourceError::StreamNotFound(stream.clone())
                } else {
                    kinesis_error(e)
                }
            })?;

        let description = output
            .stream_description
            .ok_or_else(|| SourceError::StreamNotFound(stream.clone()))?;

        Ok(StreamDescription {
            status: convert_status(description.stream_status()),
            shards: description
                .shards()
                .iter()
                .map(|shard| shard.shard_id().to_string())
                .collect(),
        })
    }

    async fn shard_iterator(
        &self,
        stream: &StreamKey,
        shard_id: &str,
        position: StartingPosition,
    ) -> Result<String, SourceError> {
        let iterator_type = match position {
            StartingPosition::Latest => ShardIteratorType::Latest,
            StartingPosition::TrimHorizon => ShardIteratorType::TrimHorizon,
        };

        let output = self
            .client(&stream.region)?
            .get_shard_iterator()
            .stream_name(&stream.name)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type)
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                if e.is_resource_not_found_exception() {
                    SourceError::ShardNotFound {
                        stream: stream.clone(),
                        shard: shard_id.to_string(),
                    }
                } else {
                    kinesis_error(e)
                }
            })?;

        output
            .shard_iterator()
            .map(str::to_string)
            .ok_or(SourceError::ExpiredIterator)
    }

    async fn get_records(
        &self,
        stream: &StreamKey,
        cursor: &str,
        limit: usize,
    ) -> Result<RecordBatch, SourceError> {
        let output = self
            .client(&stream.region)?
            .get_records()
            .shard_iterator(cursor)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(|e| {
                let e = e.into_service_error();
                if e.is_expired_iterator_exception() {
                    SourceError::ExpiredIterator
                } else {
                    kinesis_error(e)
                }
            })?;

        Ok(RecordBatch {
            records: output
                .records()
                .iter()
                .map(|record| Bytes::copy_from_slice(record.data().as_ref()))
                .collect(),
            next_cursor: output.next_shard_iterator().map(str::to_string),
        })
    }

    async fn list_streams(&self) -> Result<Vec<StreamKey>, SourceError> {
        let mut streams = Vec::new();

        for (region, client) in &self.clients {
            let mut start_after: Option<String> = None;

            loop {
                let output = client
                    .list_streams()
                    .set_exclusive_start_stream_name(start_after.take())
                    .send()
                    .await
                    .map_err(kinesis_error)?;

                let names = output.stream_names();
                streams.extend(names.iter().map(|name| StreamKey::new(region.clone(), name.clone())));

                match names.last() {
                    Some(last) if output.has_more_streams() => start_after = Some(last.clone()),
                    _ => break,
                }
            }
        }

        streams.sort();
        Ok(streams)
    }
}
