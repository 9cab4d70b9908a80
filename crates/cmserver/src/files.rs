//
// files.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! The file-staging surface: callers stage inputs into (and fetch outputs
//! from) the working directory the kernel executes in. Paths arrive
//! percent-encoded and are cleaned and verified before any filesystem
//! access.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Response, StatusCode};
use serde::Serialize;

use crate::server::json_response;

pub const ERR_CODE_FILE_NOT_FOUND: &str = "ERR_FILE_NOT_FOUND";
pub const ERR_CODE_DIR_NOT_FOUND: &str = "ERR_DIR_NOT_FOUND";
pub const ERR_CODE_FILE_ACCESS: &str = "ERR_FILE_ACCESS";
pub const ERR_CODE_SYMLINK_NOT_ALLOWED: &str = "ERR_SYMLINK_NOT_ALLOWED";

const FILE_TYPE: &str = "file";
const DIR_TYPE: &str = "directory";
const DIR_PATH_MAX_DEPTH: usize = 5;
const UPLOAD_SIZE_LIMIT: u64 = 250 * 1024 * 1024;
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Metadata returned for staged files and directories.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "last_modified_time")]
    pub last_modified: DateTime<Utc>,
    #[serde(rename = "mime_type")]
    pub mime_type: String,
}

pub struct FileStaging {
    root: PathBuf,
}

impl FileStaging {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// List files under the working directory (or a sub-path of it),
    /// skipping symlinks.
    pub async fn list_files(&self, custom_path: Option<&str>) -> Response<Body> {
        let target = match self.resolve_dir(custom_path) {
            Ok(target) => target,
            Err(response) => return response,
        };

        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return log_and_respond(
                    StatusCode::NOT_FOUND,
                    ERR_CODE_DIR_NOT_FOUND,
                    "File path not found",
                );
            }
            Err(e) => {
                log::error!("Unable to read directory {:?}: {}", target, e);
                return json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("error reading directory: {}", e),
                    true,
                );
            }
        };

        let mut metadata_list: Vec<FileMetadata> = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Unable to read directory entry: {}", e);
                    continue;
                }
            };

            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(e) => {
                    log::error!("Unable to get file type for {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata().await {
                Ok(metadata) => metadata_list.push(file_metadata(&name, &metadata)),
                Err(e) => {
                    log::error!("Unable to get file info for {}: {}", name, e);
                }
            }
        }

        log::info!("Listed {} files under {:?}", metadata_list.len(), target);
        match serde_json::to_string(&metadata_list) {
            Ok(body) => json_response(StatusCode::OK, &body, false),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("error marshaling response: {}", e),
                true,
            ),
        }
    }

    /// Accept a multipart upload (field name `file`) into the working
    /// directory or a sub-path of it.
    pub async fn upload(&self, req: Request<Body>, custom_path: Option<&str>) -> Response<Body> {
        let target = match self.resolve_dir(custom_path) {
            Ok(target) => target,
            Err(response) => return response,
        };

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let boundary = match multer::parse_boundary(content_type) {
            Ok(boundary) => boundary,
            Err(e) => {
                log::error!("Unable to parse multipart form: {}", e);
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &format!("error parsing form: {}", e),
                    true,
                );
            }
        };

        let constraints = multer::Constraints::new()
            .size_limit(multer::SizeLimit::new().whole_stream(UPLOAD_SIZE_LIMIT));
        let mut multipart = multer::Multipart::with_constraints(req.into_body(), boundary, constraints);

        let mut metadata_list: Vec<FileMetadata> = Vec::new();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Unable to parse multipart form: {}", e);
                    return json_response(
                        StatusCode::BAD_REQUEST,
                        &format!("error parsing form: {}", e),
                        true,
                    );
                }
            };

            if field.name() != Some("file") {
                continue;
            }

            if let Err(e) = self.save_field(field, &target, &mut metadata_list).await {
                log::error!("Failed to save uploaded file: {}", e);
                // keep going; partial uploads still report the files that landed
            }
        }

        log::info!("Uploaded {} files to {:?}", metadata_list.len(), target);
        match serde_json::to_string(&metadata_list) {
            Ok(body) => json_response(StatusCode::OK, &body, false),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("error marshaling response: {}", e),
                true,
            ),
        }
    }

    async fn save_field(
        &self,
        field: multer::Field<'_>,
        target: &Path,
        metadata_list: &mut Vec<FileMetadata>,
    ) -> Result<(), anyhow::Error> {
        let filename = field.file_name().unwrap_or("upload").to_string();
        let filename = percent_encoding::percent_decode_str(&filename)
            .decode_utf8()?
            .to_string();

        let data = field.bytes().await?;

        tokio::fs::create_dir_all(target).await?;

        let base = Path::new(&filename)
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("upload has no file name"))?;
        let dst_path = target.join(base);
        tokio::fs::write(&dst_path, &data).await?;

        // The kernel runs as a different user; staged files must stay
        // accessible to it
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dst_path, std::fs::Permissions::from_mode(0o777)).await?;
        }

        let metadata = tokio::fs::metadata(&dst_path).await?;
        metadata_list.push(file_metadata(&base.to_string_lossy(), &metadata));
        Ok(())
    }

    /// Serve a staged file's contents.
    pub async fn download(&self, custom_path: Option<&str>, filename: &str) -> Response<Body> {
        let target = match self.resolve_dir(custom_path) {
            Ok(target) => target,
            Err(response) => return response,
        };

        let filename = match decode_filename(filename) {
            Ok(filename) => filename,
            Err(response) => return response,
        };
        let file_path = target.join(&filename);

        let metadata = match tokio::fs::symlink_metadata(&file_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return log_and_respond(
                    StatusCode::NOT_FOUND,
                    ERR_CODE_FILE_NOT_FOUND,
                    "File not found",
                );
            }
            Err(_) => {
                return log_and_respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERR_CODE_FILE_ACCESS,
                    "Error accessing file",
                );
            }
        };

        if metadata.file_type().is_symlink() {
            return log_and_respond(
                StatusCode::BAD_REQUEST,
                ERR_CODE_SYMLINK_NOT_ALLOWED,
                "Symlinks not allowed",
            );
        }

        let contents = match tokio::fs::read(&file_path).await {
            Ok(contents) => contents,
            Err(e) => {
                log::error!("Unable to read file {:?}: {}", file_path, e);
                return log_and_respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERR_CODE_FILE_ACCESS,
                    "Error accessing file",
                );
            }
        };

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, mime_type_for(&filename))
            .body(Body::from(contents))
            .expect("Unable to create file response")
    }

    /// Delete a staged file from the working directory.
    pub async fn delete(&self, filename: &str) -> Response<Body> {
        let filename = match decode_filename(filename) {
            Ok(filename) => filename,
            Err(response) => return response,
        };
        let file_path = self.root.join(&filename);

        match tokio::fs::symlink_metadata(&file_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return log_and_respond(
                    StatusCode::NOT_FOUND,
                    ERR_CODE_FILE_NOT_FOUND,
                    "File not found",
                );
            }
            Err(_) => {
                return log_and_respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERR_CODE_FILE_ACCESS,
                    "Error accessing file",
                );
            }
        }

        if let Err(e) = tokio::fs::remove_file(&file_path).await {
            log::error!("Error deleting file {}: {}", filename, e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("error deleting file: {}", e),
                true,
            );
        }

        log::info!("File {} deleted successfully", filename);
        json_response(StatusCode::OK, "file deleted successfully", true)
    }

    /// Report metadata for a staged file.
    pub async fn get_metadata(&self, filename: &str) -> Response<Body> {
        let filename = match decode_filename(filename) {
            Ok(filename) => filename,
            Err(response) => return response,
        };
        let file_path = self.root.join(&filename);

        let metadata = match tokio::fs::symlink_metadata(&file_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return log_and_respond(
                    StatusCode::NOT_FOUND,
                    ERR_CODE_FILE_NOT_FOUND,
                    "File not found",
                );
            }
            Err(_) => {
                return log_and_respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ERR_CODE_FILE_ACCESS,
                    "Error accessing file",
                );
            }
        };

        let file_metadata = file_metadata(&filename, &metadata);
        match serde_json::to_string(&file_metadata) {
            Ok(body) => json_response(StatusCode::OK, &body, false),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("error marshaling response: {}", e),
                true,
            ),
        }
    }

    /// Resolve an optional caller-supplied sub-path against the working
    /// directory, rejecting anything that escapes it.
    fn resolve_dir(&self, custom_path: Option<&str>) -> Result<PathBuf, Response<Body>> {
        let custom_path = match custom_path {
            Some(path) if !path.is_empty() => path,
            _ => return Ok(self.root.clone()),
        };

        let decoded = match unescape_and_clean_path(custom_path) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::error!("Unable to url decode path: {}", e);
                return Err(json_response(
                    StatusCode::BAD_REQUEST,
                    "Unable to url decode path",
                    true,
                ));
            }
        };

        let target = self.root.join(decoded.trim_start_matches('/'));
        match clean_and_verify_target_path(&self.root, &target) {
            Ok(target) => Ok(target),
            Err(e) => {
                log::error!("Unable to clean and verify target path: {}", e);
                Err(json_response(
                    StatusCode::BAD_REQUEST,
                    "Unable to clean and verify target path",
                    true,
                ))
            }
        }
    }
}

fn decode_filename(filename: &str) -> Result<String, Response<Body>> {
    match percent_encoding::percent_decode_str(filename).decode_utf8() {
        Ok(decoded) => {
            // Only the base name is ever used
            match Path::new(decoded.as_ref()).file_name() {
                Some(base) => Ok(base.to_string_lossy().to_string()),
                None => Err(json_response(
                    StatusCode::BAD_REQUEST,
                    "error decoding file name",
                    true,
                )),
            }
        }
        Err(e) => {
            log::error!("Error decoding file name: {}", e);
            Err(json_response(
                StatusCode::BAD_REQUEST,
                &format!("error decoding file name: {}", e),
                true,
            ))
        }
    }
}

fn file_metadata(name: &str, metadata: &std::fs::Metadata) -> FileMetadata {
    let kind = if metadata.is_dir() { DIR_TYPE } else { FILE_TYPE };
    let last_modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    FileMetadata {
        name: name.to_string(),
        kind: kind.to_string(),
        filename: name.to_string(),
        size: metadata.len(),
        last_modified,
        mime_type: mime_type_for(name),
    }
}

fn mime_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

fn log_and_respond(status: StatusCode, err_code: &str, err_msg: &str) -> Response<Body> {
    log::error!("{}: {}", err_code, err_msg);
    json_response(status, &format!("{}: {}", err_code, err_msg), true)
}

/// Percent-decode each `/`-separated segment of a caller-supplied path, then
/// clean it lexically. The result starts with `/` and contains no `.` or
/// `..` components.
pub(crate) fn unescape_and_clean_path(path: &str) -> Result<String, anyhow::Error> {
    let mut unescaped = String::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        let decoded = percent_encoding::percent_decode_str(segment).decode_utf8()?;
        unescaped.push('/');
        unescaped.push_str(&decoded);
    }

    let cleaned = lexical_clean(Path::new(&unescaped));
    Ok(cleaned.to_string_lossy().to_string())
}

/// Verify that a target path stays under the staging root and within the
/// allowed depth. Returns the cleaned path.
pub(crate) fn clean_and_verify_target_path(
    root: &Path,
    path: &Path,
) -> Result<PathBuf, anyhow::Error> {
    let cleaned_root = lexical_clean(root);
    let cleaned = lexical_clean(path);

    if !cleaned.starts_with(&cleaned_root) {
        anyhow::bail!(
            "failed to properly verify destination file path {:?}: path did not end up in the {:?} directory",
            cleaned,
            cleaned_root
        );
    }

    let depth = cleaned
        .strip_prefix(&cleaned_root)
        .map(|rest| rest.components().count())
        .unwrap_or(0);
    if depth > DIR_PATH_MAX_DEPTH {
        anyhow::bail!(
            "destination file path {:?} is too deep: directory depth should not exceed {}, was {}",
            cleaned,
            DIR_PATH_MAX_DEPTH,
            depth
        );
    }

    Ok(cleaned)
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                cleaned.pop();
            }
            Component::CurDir => {}
            other => cleaned.push(other),
        }
    }
    cleaned
}
