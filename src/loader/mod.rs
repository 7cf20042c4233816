//! Stateless download worker: concurrent HEAD probes and sequential
//! streaming downloads through a ZIP writer.
//!
//! The loader owns no task state. Both operations take a plain URL list and
//! return one fresh [`FileRecord`] per URL in input order; correlating those
//! records with stored state is the manager's job. Per-URL failures are
//! recorded in-band (`status` / `error_msg`) and never abort the batch —
//! only request construction and ZIP-writer breakage are fatal.

mod client;
mod error;
mod filename;
mod headers;
pub mod mime;

pub use client::{CONNECT_TIMEOUT, READ_TIMEOUT, build_outbound_client};
pub use error::LoaderError;
pub use filename::archive_entry_name;

use std::collections::HashSet;

use async_zip::tokio::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::io::AsyncWriteExt;
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tracing::{debug, error};
use url::Url;

use crate::egress::{self, EgressBlocked};
use crate::model::FileRecord;

/// Bytes of body needed for the signature sniff.
const MAGIC_LEN: usize = 8;

/// Name of the per-archive report entry.
const STATUS_ENTRY: &str = "status.json";

/// Stateless worker over a shared outbound client and a MIME allow-list.
#[derive(Debug, Clone)]
pub struct Loader {
    client: Client,
    allowed: HashSet<String>,
}

impl Loader {
    /// Creates a loader. A file passes only when both its declared and its
    /// sniffed MIME type appear in `allow_mime`.
    #[must_use]
    pub fn new(client: Client, allow_mime: impl IntoIterator<Item = String>) -> Self {
        Self {
            client,
            allowed: allow_mime.into_iter().collect(),
        }
    }

    /// Probes every URL with a HEAD request and returns one record per URL
    /// in input order. A single URL runs inline; larger batches fan out one
    /// concurrent worker per URL.
    ///
    /// # Errors
    ///
    /// Only request-construction failures are fatal; everything else is
    /// recorded on the per-URL records.
    pub async fn check(&self, urls: &[String]) -> Result<Vec<FileRecord>, LoaderError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        if urls.len() == 1 {
            return Ok(vec![self.check_file(&urls[0], 1).await?]);
        }

        join_all(
            urls.iter()
                .enumerate()
                .map(|(index, url)| self.check_file(url, index + 1)),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn check_file(
        &self,
        raw_url: &str,
        unique_num: usize,
    ) -> Result<FileRecord, LoaderError> {
        let mut file = FileRecord::new(raw_url);
        let result = self.probe(&mut file, raw_url, unique_num).await;
        file.fill_default_error();
        result.map(|()| file)
    }

    async fn probe(
        &self,
        file: &mut FileRecord,
        raw_url: &str,
        unique_num: usize,
    ) -> Result<(), LoaderError> {
        let Some(url) = parse_target(file, raw_url) else {
            return Ok(());
        };

        let response = match self.client.head(url).send().await {
            Ok(response) => response,
            Err(send_error) => return record_send_failure(file, raw_url, send_error),
        };

        file.status = response.status().as_u16();
        if file.status != 200 {
            debug!(url = %raw_url, status = file.status, "unexpected status");
            return Ok(());
        }

        file.size = headers::content_length(response.headers());
        file.content_type = headers::content_type(response.headers());
        if !self.allowed.contains(&file.content_type) {
            file.status = 403;
            file.error_msg = format!("file type {:?} is not allowed", file.content_type);
            debug!(url = %raw_url, content_type = %file.content_type, "blocked by content-type");
            return Ok(());
        }

        file.orig_name = headers::disposition_filename(response.headers());
        if let Some(file_type) = mime::by_mime(&file.content_type) {
            file.name = archive_entry_name(&file.orig_name, file_type.extension(), unique_num);
        }

        debug!(url = %raw_url, "probe ok");
        Ok(())
    }

    /// Downloads every URL sequentially, streaming each accepted payload
    /// into a ZIP entry of `out`, then appends a `status.json` entry with
    /// the full ordered record list. The ZIP central directory is flushed
    /// on every exit path, including after a fatal error.
    ///
    /// # Errors
    ///
    /// Fatal only on request construction or ZIP-writer failure; per-URL
    /// failures are recorded on the returned records.
    pub async fn download<W>(
        &self,
        urls: &[String],
        out: W,
    ) -> Result<Vec<FileRecord>, LoaderError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut zip = ZipFileWriter::with_tokio(out);

        let mut files = Vec::with_capacity(urls.len());
        let mut fatal = None;

        for (index, url) in urls.iter().enumerate() {
            let (file, file_fatal) = self.download_file(&mut zip, url, index + 1).await;
            files.push(file);
            if let Some(error) = file_fatal {
                fatal = Some(error);
                break;
            }
        }

        if fatal.is_none() {
            fatal = write_status_entry(&mut zip, &files).await.err();
        }

        // Flush the central directory even when a fatal error cut the loop
        // short; clients detect the broken archive from the report or the
        // truncation, not from a missing directory.
        let close_result = zip.close().await;

        if let Some(error) = fatal {
            return Err(error);
        }
        close_result.map_err(LoaderError::zip)?;

        Ok(files)
    }

    async fn download_file<W>(
        &self,
        zip: &mut ZipFileWriter<W>,
        raw_url: &str,
        unique_num: usize,
    ) -> (FileRecord, Option<LoaderError>)
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut file = FileRecord::new(raw_url);
        let fatal = self
            .fetch_into_zip(&mut file, zip, raw_url, unique_num)
            .await
            .err();
        file.fill_default_error();
        (file, fatal)
    }

    async fn fetch_into_zip<W>(
        &self,
        file: &mut FileRecord,
        zip: &mut ZipFileWriter<W>,
        raw_url: &str,
        unique_num: usize,
    ) -> Result<(), LoaderError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Some(url) = parse_target(file, raw_url) else {
            return Ok(());
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(send_error) => return record_send_failure(file, raw_url, send_error),
        };

        file.status = response.status().as_u16();
        if file.status != 200 {
            debug!(url = %raw_url, status = file.status, "unexpected status");
            return Ok(());
        }

        file.content_type = headers::content_type(response.headers());
        if !self.allowed.contains(&file.content_type) {
            file.status = 403;
            file.error_msg = format!("file type {:?} is not allowed", file.content_type);
            debug!(url = %raw_url, content_type = %file.content_type, "blocked by content-type");
            return Ok(());
        }

        file.orig_name = headers::disposition_filename(response.headers());

        // Accumulate the leading bytes needed for the signature sniff.
        let mut stream = response.bytes_stream();
        let mut head: Vec<u8> = Vec::with_capacity(MAGIC_LEN);
        let mut at_eof = false;
        while head.len() < MAGIC_LEN && !at_eof {
            match stream.next().await {
                Some(Ok(chunk)) => head.extend_from_slice(&chunk),
                Some(Err(read_error)) => {
                    file.status = 502;
                    debug!(url = %raw_url, error = %read_error, "first chunk read failed");
                    return Ok(());
                }
                None => at_eof = true,
            }
        }
        file.size = head.len() as i64;

        let magic = &head[..head.len().min(MAGIC_LEN)];
        let Some(file_type) = mime::by_signature(magic) else {
            file.status = 403;
            file.error_msg = "unknown file type".to_string();
            debug!(url = %raw_url, "no signature match");
            return Ok(());
        };

        file.real_type = file_type.mime.to_string();
        if !self.allowed.contains(file_type.mime) {
            file.status = 403;
            file.error_msg = format!("file type {:?} is not allowed", file.real_type);
            debug!(url = %raw_url, real_type = %file.real_type, "blocked by real file type");
            return Ok(());
        }

        file.name = archive_entry_name(&file.orig_name, file_type.extension(), unique_num);

        let entry = ZipEntryBuilder::new(file.name.clone().into(), Compression::Deflate);
        let mut entry_writer = match zip.write_entry_stream(entry).await {
            Ok(writer) => writer,
            Err(zip_error) => {
                file.status = 500;
                error!(url = %raw_url, error = %zip_error, "create zip entry failed");
                return Err(LoaderError::zip(zip_error));
            }
        };

        if !head.is_empty() {
            if let Err(write_error) = entry_writer.write_all(&head).await {
                file.status = 500;
                error!(url = %raw_url, error = %write_error, "zip write failed");
                return Err(LoaderError::entry_write(write_error));
            }
        }

        // Stream the remainder of the body through the entry.
        let mut truncated = false;
        while !at_eof {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    if let Err(write_error) = entry_writer.write_all(&chunk).await {
                        file.status = 500;
                        error!(url = %raw_url, error = %write_error, "zip write failed");
                        return Err(LoaderError::entry_write(write_error));
                    }
                    file.size += chunk.len() as i64;
                }
                Some(Err(read_error)) => {
                    file.status = 502;
                    debug!(url = %raw_url, error = %read_error, "body read failed");
                    truncated = true;
                    at_eof = true;
                }
                None => at_eof = true,
            }
        }

        if let Err(zip_error) = entry_writer.close().await {
            file.status = 500;
            error!(url = %raw_url, error = %zip_error, "close zip entry failed");
            return Err(LoaderError::zip(zip_error));
        }

        if !truncated {
            debug!(url = %raw_url, size = file.size, name = %file.name, "download ok");
        }
        Ok(())
    }
}

/// Validates the raw URL and applies the IP-literal egress pre-check.
/// Records the failure on `file` and returns `None` when the URL must not
/// be dispatched.
fn parse_target(file: &mut FileRecord, raw_url: &str) -> Option<Url> {
    let url = match Url::parse(raw_url) {
        Ok(url) => url,
        Err(parse_error) => {
            file.status = 400;
            file.error_msg = format!("invalid url: {parse_error}");
            debug!(url = %raw_url, error = %parse_error, "invalid url");
            return None;
        }
    };

    if let Some(ip) = egress::blocked_literal(&url) {
        file.status = 403;
        file.error_msg = EgressBlocked { ip }.to_string();
        debug!(url = %raw_url, %ip, "blocked private destination");
        return None;
    }

    Some(url)
}

/// Classifies a failed send: request construction is fatal, a refused
/// egress lookup records 403, anything else records 502.
fn record_send_failure(
    file: &mut FileRecord,
    raw_url: &str,
    send_error: reqwest::Error,
) -> Result<(), LoaderError> {
    if send_error.is_builder() {
        file.status = 500;
        error!(url = %raw_url, error = %send_error, "create request failed");
        return Err(LoaderError::request(raw_url, send_error));
    }

    if let Some(ip) = egress::blocked_ip(&send_error) {
        file.status = 403;
        file.error_msg = EgressBlocked { ip }.to_string();
        debug!(url = %raw_url, %ip, "blocked private destination");
        return Ok(());
    }

    file.status = 502;
    debug!(url = %raw_url, error = %send_error, "request failed");
    Ok(())
}

/// Serializes the full record list (4-space indent, trailing newline) into
/// the archive's `status.json` entry.
async fn write_status_entry<W>(
    zip: &mut ZipFileWriter<W>,
    files: &[FileRecord],
) -> Result<(), LoaderError>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    files
        .serialize(&mut serializer)
        .map_err(LoaderError::status_report)?;
    buf.push(b'\n');

    let entry = ZipEntryBuilder::new(STATUS_ENTRY.to_string().into(), Compression::Deflate);
    zip.write_entry_whole(entry, &buf)
        .await
        .map_err(LoaderError::zip)
}
