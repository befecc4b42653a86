//! Client for the OI.Share HTTP interface exposed by Olympus cameras.
//!
//! Listing: `GET /get_imglist.cgi?DIR=/DCIM/100OLYMP` returns a `VER_100`
//! header line followed by one CSV line per entry:
//! `<dir>,<name>,<size>,<attributes>,<fat date>,<fat time>`.
//! Download: `GET /DCIM/100OLYMP/<name>`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::core::error::SyncError;
use crate::core::models::{RemoteEntry, is_plain_file_name};
use crate::core::share::{ChunkStream, FileShare, ShareConnector};

const LISTING_HEADER: &str = "VER_100";
const ATTR_DIRECTORY: u32 = 0x10;

/// Decode a FAT date/time pair as reported in the listing.
pub fn decode_fat_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);

    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3F);
    let second = u32::from(time & 0x1F) * 2;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Parse a listing body into entries, skipping directories.
pub fn parse_listing(body: &str) -> Result<Vec<RemoteEntry>, SyncError> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

    match lines.next() {
        Some(LISTING_HEADER) | None => {}
        Some(other) => {
            return Err(SyncError::Protocol(format!(
                "listing starts with '{other}', expected {LISTING_HEADER}"
            )));
        }
    }

    let mut entries = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let [dir, name, size, attributes, date, time] = fields.as_slice() else {
            return Err(SyncError::Protocol(format!("malformed listing line '{line}'")));
        };

        let number = |field: &str, what: &str| {
            field
                .trim()
                .parse::<u64>()
                .map_err(|_| SyncError::Protocol(format!("bad {what} '{field}' in '{line}'")))
        };

        let size = number(*size, "size")?;
        let attributes = u32::try_from(number(*attributes, "attributes")?)
            .map_err(|_| SyncError::Protocol(format!("bad attributes '{attributes}' in '{line}'")))?;
        if attributes & ATTR_DIRECTORY != 0 {
            continue;
        }

        // Names are joined onto the destination directory later
        if !is_plain_file_name(name) {
            return Err(SyncError::Protocol(format!("unsafe file name '{name}' in '{line}'")));
        }

        let date = u16::try_from(number(*date, "date")?).unwrap_or(0);
        let time = u16::try_from(number(*time, "time")?).unwrap_or(0);

        let mut entry = RemoteEntry::new(*dir, *name, size);
        entry.captured_at = decode_fat_datetime(date, time);
        entries.push(entry);
    }

    Ok(entries)
}

/// Builds HTTP sessions against the camera.
pub struct OiShareConnector {
    base_url: String,
    connect_timeout: Duration,
    chunk_size: usize,
}

impl OiShareConnector {
    pub fn new(address: &str, port: u16, connect_timeout: Duration, chunk_size: usize) -> Self {
        Self {
            base_url: format!("http://{address}:{port}"),
            connect_timeout,
            chunk_size,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ShareConnector for OiShareConnector {
    async fn connect(&self) -> Result<Box<dyn FileShare>, SyncError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        Ok(Box::new(OiShareClient {
            client,
            base_url: self.base_url.clone(),
            chunk_size: self.chunk_size,
        }))
    }
}

pub struct OiShareClient {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
}

#[async_trait]
impl FileShare for OiShareClient {
    async fn list_entries(&self, dir: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        // The camera expects the path verbatim, slashes unescaped
        let url = format!("{}/get_imglist.cgi?DIR={dir}", self.base_url);
        debug!(url = %url, "Listing camera directory");

        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_listing(&body)
    }

    async fn download(&self, entry: &RemoteEntry) -> Result<Box<dyn ChunkStream>, SyncError> {
        let url = format!("{}{}", self.base_url, entry.remote_path());
        debug!(url = %url, "Downloading");

        let response = self.client.get(&url).send().await?.error_for_status()?;

        Ok(Box::new(ResponseChunks {
            response,
            name: entry.name.clone(),
            buffer: Vec::with_capacity(self.chunk_size),
            chunk_size: self.chunk_size,
            finished: false,
        }))
    }
}

/// Re-chunks a response body into fixed-size pieces (the last may be shorter).
struct ResponseChunks {
    response: reqwest::Response,
    name: String,
    buffer: Vec<u8>,
    chunk_size: usize,
    finished: bool,
}

#[async_trait]
impl ChunkStream for ResponseChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        while !self.finished && self.buffer.len() < self.chunk_size {
            let next = self
                .response
                .chunk()
                .await
                .map_err(|e| SyncError::Download {
                    name: self.name.clone(),
                    reason: e.to_string(),
                })?;

            match next {
                Some(bytes) => self.buffer.extend_from_slice(&bytes),
                None => self.finished = true,
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let take = self.buffer.len().min(self.chunk_size);
        let rest = self.buffer.split_off(take);
        Ok(Some(std::mem::replace(&mut self.buffer, rest)))
    }
}
