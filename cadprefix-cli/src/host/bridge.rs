use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

use super::{AuthoringHost, DocumentHandle, HostConnector};
use crate::core::error::{HostError, HostResult};
use crate::core::{DerivedLink, Occurrence, OccurrenceId, Transform};

/// Error codes the bridge uses to classify failures
pub mod codes {
    pub const NOT_FOUND: i32 = -32001;
    pub const LOCKED: i32 = -32002;
    pub const TRANSIENT: i32 = -32003;
    pub const NOT_SUPPORTED: i32 = -32004;
    pub const INVALID_HANDLE: i32 = -32005;
}

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: u64,
    method: String,
    params: Value,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC notification (no response expected)
#[derive(Debug, Serialize)]
struct JsonRpcNotification {
    jsonrpc: String,
    method: String,
    params: Value,
}

impl JsonRpcError {
    fn into_host_error(self) -> HostError {
        let path = self
            .data
            .as_ref()
            .and_then(|d| d.get("path"))
            .and_then(|p| p.as_str())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&self.message));

        match self.code {
            codes::NOT_FOUND => HostError::NotFound(path),
            codes::LOCKED => HostError::Locked(path),
            codes::TRANSIENT => HostError::Transient(self.message),
            codes::NOT_SUPPORTED => HostError::NotSupported(self.message),
            codes::INVALID_HANDLE => HostError::InvalidHandle(
                self.data
                    .as_ref()
                    .and_then(|d| d.get("handle"))
                    .and_then(|h| h.as_u64())
                    .unwrap_or(0),
            ),
            code => HostError::Protocol(format!("code={}, message={}", code, self.message)),
        }
    }
}

/// Authoring host reached through a bridge process speaking JSON-RPC over stdio.
///
/// The bridge owns the real CAD application (e.g. an automation server on
/// Windows) and exposes one method per [`AuthoringHost`] operation.
pub struct BridgeHost {
    process: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    request_id: u64,
    shut_down: bool,
}

impl BridgeHost {
    /// Spawn the bridge and perform the `initialize` handshake
    pub fn start(command: &str, args: &[String]) -> HostResult<Self> {
        let mut process = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                HostError::SessionUnavailable(format!("failed to spawn {}: {}", command, e))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| HostError::SessionUnavailable("failed to capture stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| HostError::SessionUnavailable("failed to capture stdout".to_string()))?;

        let mut host = Self {
            process,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            request_id: 0,
            shut_down: false,
        };

        let info = host.request("initialize", json!({ "client": "cadprefix" })).map_err(|e| {
            HostError::SessionUnavailable(format!("bridge initialization failed: {}", e))
        })?;
        info!("Authoring host bridge ready: {}", info);

        Ok(host)
    }

    fn next_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    fn write_message<T: Serialize>(&mut self, message: &T) -> HostResult<()> {
        let json = serde_json::to_string(message).map_err(|e| HostError::Protocol(e.to_string()))?;
        write!(self.stdin, "Content-Length: {}\r\n\r\n{}", json.len(), json)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| HostError::SessionUnavailable(format!("bridge write failed: {}", e)))
    }

    fn request(&mut self, method: &str, params: Value) -> HostResult<Value> {
        let id = self.next_id();
        debug!("bridge -> {} #{}", method, id);
        self.write_message(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        })?;
        self.read_response(id)
    }

    fn request_as<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> HostResult<T> {
        let value = self.request(method, params)?;
        serde_json::from_value(value)
            .map_err(|e| HostError::Protocol(format!("unexpected {} result: {}", method, e)))
    }

    fn notify(&mut self, method: &str, params: Value) -> HostResult<()> {
        self.write_message(&JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        })
    }

    fn read_message(&mut self) -> HostResult<String> {
        let mut content_length = None;
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| HostError::SessionUnavailable(format!("bridge read failed: {}", e)))?;
            if read == 0 {
                return Err(HostError::SessionUnavailable("bridge closed its output".to_string()));
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some(value) = line.trim().strip_prefix("Content-Length:") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }

        let length = content_length
            .ok_or_else(|| HostError::Protocol("missing or invalid Content-Length".to_string()))?;
        let mut buffer = vec![0u8; length];
        self.stdout
            .read_exact(&mut buffer)
            .map_err(|e| HostError::SessionUnavailable(format!("bridge read failed: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| HostError::Protocol(format!("invalid UTF-8: {}", e)))
    }

    fn read_response(&mut self, expected_id: u64) -> HostResult<Value> {
        const MAX_MESSAGES: usize = 100;

        for _ in 0..MAX_MESSAGES {
            let content = self.read_message()?;
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&content) else {
                continue;
            };
            if response.id != Some(expected_id) {
                // Notification or a stale response, keep reading
                continue;
            }
            if let Some(error) = response.error {
                return Err(error.into_host_error());
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }

        Err(HostError::Protocol(format!(
            "no response to request {} after {} messages",
            expected_id, MAX_MESSAGES
        )))
    }

    fn wait_for_exit(&mut self) {
        for _ in 0..10 {
            match self.process.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => std::thread::sleep(Duration::from_millis(100)),
                Err(_) => break,
            }
        }
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

fn path_param(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl AuthoringHost for BridgeHost {
    fn open(&mut self, path: &Path, writable: bool) -> HostResult<DocumentHandle> {
        self.request_as(
            "document/open",
            json!({ "path": path_param(path), "writable": writable }),
        )
        .map(DocumentHandle)
    }

    fn close(&mut self, handle: DocumentHandle, save: bool) -> HostResult<()> {
        self.request("document/close", json!({ "handle": handle.0, "save": save }))
            .map(|_| ())
    }

    fn save(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.request("document/save", json!({ "handle": handle.0 })).map(|_| ())
    }

    fn occurrences(&mut self, handle: DocumentHandle) -> HostResult<Vec<Occurrence>> {
        self.request_as("document/occurrences", json!({ "handle": handle.0 }))
    }

    fn replace_reference(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        new_path: &Path,
    ) -> HostResult<()> {
        self.request(
            "occurrence/replaceReference",
            json!({ "handle": handle.0, "occurrence": occurrence.0, "path": path_param(new_path) }),
        )
        .map(|_| ())
    }

    fn add_occurrence(
        &mut self,
        handle: DocumentHandle,
        path: &Path,
        transform: &Transform,
    ) -> HostResult<OccurrenceId> {
        self.request_as(
            "occurrence/add",
            json!({ "handle": handle.0, "path": path_param(path), "transform": transform }),
        )
        .map(OccurrenceId)
    }

    fn set_occurrence_state(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
        name: &str,
        visible: bool,
        suppressed: bool,
    ) -> HostResult<()> {
        self.request(
            "occurrence/setState",
            json!({
                "handle": handle.0,
                "occurrence": occurrence.0,
                "name": name,
                "visible": visible,
                "suppressed": suppressed,
            }),
        )
        .map(|_| ())
    }

    fn delete_occurrence(
        &mut self,
        handle: DocumentHandle,
        occurrence: &OccurrenceId,
    ) -> HostResult<()> {
        self.request(
            "occurrence/delete",
            json!({ "handle": handle.0, "occurrence": occurrence.0 }),
        )
        .map(|_| ())
    }

    fn referenced_documents(&mut self, handle: DocumentHandle) -> HostResult<Vec<PathBuf>> {
        self.request_as("document/referencedDocuments", json!({ "handle": handle.0 }))
    }

    fn close_referenced_document(
        &mut self,
        handle: DocumentHandle,
        referenced: &Path,
    ) -> HostResult<()> {
        self.request(
            "document/closeReferenced",
            json!({ "handle": handle.0, "path": path_param(referenced) }),
        )
        .map(|_| ())
    }

    fn read_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
    ) -> HostResult<Option<String>> {
        self.request_as(
            "property/read",
            json!({ "handle": handle.0, "set": property_set, "key": key }),
        )
    }

    fn write_property(
        &mut self,
        handle: DocumentHandle,
        property_set: &str,
        key: &str,
        value: &str,
    ) -> HostResult<()> {
        self.request(
            "property/write",
            json!({ "handle": handle.0, "set": property_set, "key": key, "value": value }),
        )
        .map(|_| ())
    }

    fn update(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.request("document/update", json!({ "handle": handle.0 })).map(|_| ())
    }

    fn rebuild(&mut self, handle: DocumentHandle) -> HostResult<()> {
        self.request("document/rebuild", json!({ "handle": handle.0 })).map(|_| ())
    }

    fn derived_links(&mut self, handle: DocumentHandle) -> HostResult<Vec<DerivedLink>> {
        self.request_as("derived/list", json!({ "handle": handle.0 }))
    }

    fn remove_derived_link(&mut self, handle: DocumentHandle, link_id: &str) -> HostResult<()> {
        self.request("derived/remove", json!({ "handle": handle.0, "link": link_id }))
            .map(|_| ())
    }

    fn add_derived_link(
        &mut self,
        handle: DocumentHandle,
        source: &Path,
        scale: f64,
        transform: &Transform,
    ) -> HostResult<String> {
        self.request_as(
            "derived/add",
            json!({
                "handle": handle.0,
                "source": path_param(source),
                "scale": scale,
                "transform": transform,
            }),
        )
    }

    fn release_idle(&mut self) {
        let _ = self.notify("session/releaseIdle", Value::Null);
    }

    fn shutdown(&mut self) -> HostResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let _ = self.request("shutdown", Value::Null);
        let _ = self.notify("exit", Value::Null);
        self.wait_for_exit();
        Ok(())
    }
}

impl Drop for BridgeHost {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Starts a [`BridgeHost`] from a configured command line
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    pub command: String,
    pub args: Vec<String>,
}

impl HostConnector for BridgeConnector {
    fn connect(&self) -> HostResult<Box<dyn AuthoringHost>> {
        Ok(Box::new(BridgeHost::start(&self.command, &self.args)?))
    }

    fn describe(&self) -> String {
        format!("bridge `{}`", self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: "document/open".to_string(),
            params: json!({"path": "C:/work/BASE_100.iam", "writable": true}),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"document/open\""));
    }

    #[test]
    fn test_error_codes_map_to_host_errors() {
        let locked: JsonRpcError = serde_json::from_value(json!({
            "code": codes::LOCKED,
            "message": "file in use",
            "data": {"path": "C:/work/BASE_200.ipt"}
        }))
        .unwrap();
        assert_eq!(
            locked.into_host_error(),
            HostError::Locked(PathBuf::from("C:/work/BASE_200.ipt"))
        );

        let busy: JsonRpcError =
            serde_json::from_value(json!({"code": codes::TRANSIENT, "message": "busy"})).unwrap();
        assert!(busy.into_host_error().is_transient());

        let unknown: JsonRpcError =
            serde_json::from_value(json!({"code": -1, "message": "boom"})).unwrap();
        assert!(matches!(unknown.into_host_error(), HostError::Protocol(_)));
    }

    #[test]
    fn test_missing_bridge_is_session_unavailable() {
        let connector = BridgeConnector {
            command: "/nonexistent/cad-bridge".to_string(),
            args: Vec::new(),
        };
        assert!(matches!(
            connector.connect().err(),
            Some(HostError::SessionUnavailable(_))
        ));
    }
}
