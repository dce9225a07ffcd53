use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use super::protocol::{
    CallToolResult, GetPromptResult, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    ListPromptsResult, ListResourcesResult, ListToolsResult, ReadResourceResult,
    ServerNotification, PROTOCOL_VERSION,
};
use super::{McpClient, NOTIFICATION_BUFFER};

const INIT_TIMEOUT: Duration = Duration::from_secs(15);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MCP client over a child process speaking line-delimited JSON-RPC on
/// stdin/stdout.
pub struct StdioClient {
    server_name: String,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    tx_req: std::sync::Mutex<Option<mpsc::Sender<String>>>,
    stderr: Arc<Mutex<String>>,
    info: std::sync::RwLock<InitializeResult>,
    notifications: std::sync::Mutex<Option<mpsc::Receiver<ServerNotification>>>,
    dead: Arc<AtomicBool>,
    timeout: Duration,
    temp_dir: std::sync::Mutex<Option<TempDir>>,
}

impl StdioClient {
    pub async fn spawn(
        server_name: &str,
        command: &str,
        args: &[String],
        envs: HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Arc<Self>> {
        Self::spawn_with_temp_dir(server_name, command, args, envs, timeout_secs, None).await
    }

    async fn spawn_with_temp_dir(
        server_name: &str,
        command: &str,
        args: &[String],
        envs: HashMap<String, String>,
        timeout_secs: u64,
        temp_dir: Option<TempDir>,
    ) -> Result<Arc<Self>> {
        info!("Starting MCP server: {} ({})", server_name, command);

        let mut child = Command::new(command)
            .args(args)
            .envs(envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open MCP stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to open MCP stdout"))?;
        let stderr_pipe = child.stderr.take();

        let (tx_req, mut rx_req) = mpsc::channel::<String>(100);
        let (notif_tx, notif_rx) = mpsc::channel::<ServerNotification>(NOTIFICATION_BUFFER);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let dead = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            server_name: server_name.to_string(),
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            tx_req: std::sync::Mutex::new(Some(tx_req)),
            stderr: stderr_buf.clone(),
            info: std::sync::RwLock::new(InitializeResult::default()),
            notifications: std::sync::Mutex::new(Some(notif_rx)),
            dead: dead.clone(),
            timeout: Duration::from_secs(timeout_secs),
            temp_dir: std::sync::Mutex::new(temp_dir),
        });

        // Writer: drains the request channel into the child's stdin. Closing
        // the channel closes stdin, which is the graceful-shutdown request.
        let mut stdin_writer = tokio::io::BufWriter::new(stdin);
        tokio::spawn(async move {
            while let Some(msg) = rx_req.recv().await {
                debug!("MCP TX: {}", msg);
                if let Err(e) = stdin_writer.write_all(format!("{}\n", msg).as_bytes()).await {
                    error!("Failed to write to MCP stdin: {}", e);
                    break;
                }
                let _ = stdin_writer.flush().await;
            }
        });

        // Reader: resolves pending requests and forwards notifications.
        let reader_pending = pending.clone();
        let reader_dead = dead.clone();
        let reader_name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("MCP RX [{}]: {}", reader_name, line);
                if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                    let mut p = reader_pending.lock().await;
                    if let Some(tx) = p.remove(&resp.id) {
                        let _ = tx.send(resp);
                    }
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    if let Some(method) = value.get("method").and_then(Value::as_str) {
                        let notification = ServerNotification {
                            method: method.to_string(),
                            params: value.get("params").cloned(),
                        };
                        // Drop when the buffer is full rather than block.
                        let _ = notif_tx.try_send(notification);
                        continue;
                    }
                }
                warn!("Unparsed MCP RX [{}]: {}", reader_name, line);
            }
            warn!("MCP stdout closed for server [{}]", reader_name);
            reader_dead.store(true, Ordering::SeqCst);
            reader_pending.lock().await.clear();
        });

        // Stderr capture for initialization diagnostics.
        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = stderr_buf.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut s = stderr_log.lock().await;
                    if s.len() < 2000 {
                        s.push_str(&line);
                        s.push('\n');
                    }
                    debug!("MCP STDERR: {}", line);
                }
            });
        }

        match tokio::time::timeout(INIT_TIMEOUT, client.initialize()).await {
            Err(_) => {
                let log = client.stderr.lock().await.clone();
                let _ = client.close().await;
                Err(anyhow!(
                    "MCP initialization timeout for [{}]. Stderr: {}",
                    server_name,
                    log
                ))
            }
            Ok(Err(e)) => {
                let log = client.stderr.lock().await.clone();
                let _ = client.close().await;
                Err(anyhow!(
                    "MCP initialization failed for [{}]: {}. Stderr: {}",
                    server_name,
                    e,
                    log
                ))
            }
            Ok(Ok(())) => {
                info!("MCP server [{}] initialized", server_name);
                Ok(client)
            }
        }
    }

    /// Builtin transport: re-invoke the host binary with `mcp <name>`.
    pub async fn builtin(name: &str, timeout_secs: u64) -> Result<Arc<Self>> {
        let executable =
            std::env::current_exe().context("failed to resolve current executable")?;
        Self::spawn(
            name,
            &executable.to_string_lossy(),
            &["mcp".to_string(), name.to_string()],
            HashMap::new(),
            timeout_secs,
        )
        .await
    }

    /// Inline-python transport: write `code` to a temp file and run it under
    /// `uvx --with mcp [--with dep]... mcp run <file>`. The temp directory is
    /// removed on close.
    pub async fn inline_python(
        name: &str,
        code: &str,
        dependencies: &[String],
        timeout_secs: u64,
    ) -> Result<Arc<Self>> {
        let temp_dir = tempfile::Builder::new()
            .prefix("goose-python-")
            .tempdir()
            .context("failed to create temp dir")?;
        let code_path = temp_dir.path().join("extension.py");
        tokio::fs::write(&code_path, code)
            .await
            .context("failed to write extension code")?;

        let mut args = vec!["--with".to_string(), "mcp".to_string()];
        for dep in dependencies {
            args.push("--with".to_string());
            args.push(dep.clone());
        }
        args.push("mcp".to_string());
        args.push("run".to_string());
        args.push(code_path.to_string_lossy().into_owned());

        Self::spawn_with_temp_dir(
            name,
            "uvx",
            &args,
            HashMap::new(),
            timeout_secs,
            Some(temp_dir),
        )
        .await
    }

    fn sender(&self) -> Result<mpsc::Sender<String>> {
        self.tx_req
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| anyhow!("extension [{}] is closed", self.server_name))
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(anyhow!("extension [{}] process has exited", self.server_name));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };
        let payload = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        self.sender()?.send(payload).await.map_err(|_| {
            anyhow!("extension [{}] request channel closed", self.server_name)
        })?;

        let resp = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(anyhow!(
                    "extension [{}] exited before responding",
                    self.server_name
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(anyhow!(
                    "extension [{}] timed out after {:?}",
                    self.server_name,
                    self.timeout
                ));
            }
        };

        if let Some(error) = resp.error {
            return Err(anyhow!("MCP RPC error: {}", error));
        }
        resp.result.ok_or_else(|| anyhow!("MCP RPC missing result"))
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let payload = serde_json::json!({"jsonrpc": "2.0", "method": method}).to_string();
        self.sender()?
            .send(payload)
            .await
            .map_err(|_| anyhow!("extension [{}] request channel closed", self.server_name))?;
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": {"listChanged": true},
                "sampling": {}
            },
            "clientInfo": {
                "name": "goosed",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.call("initialize", Some(params)).await?;
        let info: InitializeResult =
            serde_json::from_value(result).context("invalid initialize result")?;
        if let Ok(mut guard) = self.info.write() {
            *guard = info;
        }

        self.notify("notifications/initialized").await
    }

    fn cursor_params(cursor: Option<String>) -> Option<Value> {
        cursor.map(|c| serde_json::json!({"cursor": c}))
    }
}

#[async_trait]
impl McpClient for StdioClient {
    async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        let result = self
            .call("resources/list", Self::cursor_params(cursor))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let result = self
            .call("resources/read", Some(serde_json::json!({"uri": uri})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        let result = self.call("tools/list", Self::cursor_params(cursor)).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(anyhow!("tool not found: {}", name));
        }
        let result = self
            .call(
                "tools/call",
                Some(serde_json::json!({"name": name, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        let result = self
            .call("prompts/list", Self::cursor_params(cursor))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult> {
        let result = self
            .call(
                "prompts/get",
                Some(serde_json::json!({"name": name, "arguments": arguments})),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<ServerNotification>> {
        self.notifications.lock().ok().and_then(|mut g| g.take())
    }

    fn get_info(&self) -> InitializeResult {
        self.info
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<()> {
        self.dead.store(true, Ordering::SeqCst);

        // Dropping the request sender closes the channel, the writer task
        // exits and the child's stdin closes: the graceful shutdown request.
        if let Ok(mut guard) = self.tx_req.lock() {
            guard.take();
        }

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("MCP server [{}] exited: {}", self.server_name, status)
                }
                _ => {
                    warn!(
                        "MCP server [{}] did not exit in time, killing",
                        self.server_name
                    );
                    let _ = child.kill().await;
                }
            }
        }

        if let Ok(mut guard) = self.temp_dir.lock() {
            guard.take();
        }
        Ok(())
    }
}
