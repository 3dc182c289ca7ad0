//! The embedded interpreter the Driver supervises (§4.A): a persistent
//! Python subprocess that owns the name-binding environment across
//! executions. The Driver only tails the request file, parses commands,
//! and writes response files — evaluation and output capture happen
//! inside this subprocess, driven one line of JSON in, one line of JSON
//! out over its stdin/stdout pipes.

use std::process::Stdio;

use sa_sandbox::ExecResponse;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Supervises one long-lived Python child. Dropping this kills the child
/// (`kill_on_drop`), mirroring the Controller's own process-lifetime
/// discipline one layer down.
pub struct Interpreter {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Interpreter {
    pub fn spawn() -> anyhow::Result<Self> {
        let mut child = Command::new("python3")
            .arg("-u")
            .arg("-c")
            .arg(BOOTSTRAP_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// Evaluate one snippet and return the captured response. The child
    /// process itself never terminates on user code errors (§4.A step 2);
    /// only a broken pipe or early exit here is a Driver-fatal condition.
    pub async fn eval(&mut self, code: &str) -> anyhow::Result<ExecResponse> {
        let request = serde_json::json!({ "code": code });
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("embedded interpreter closed its stdout"))?;
        let resp: ExecResponse = serde_json::from_str(&reply)?;
        Ok(resp)
    }

    /// `None` while the child is alive.
    pub fn exited(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }
}

/// Embedded bootstrap run by the Python child. Keeps one persistent
/// globals dict across every snippet; captures stdout/stderr; scans for
/// matplotlib figures, plotly figures, and PIL images after each snippet
/// per the normalization rules in §4.A.
const BOOTSTRAP_SCRIPT: &str = r#"
import sys, json, io, base64, traceback

_ns = {}
_seen = set()

def _drain_figures():
    images = []
    try:
        import matplotlib
        matplotlib.use("Agg")
        import matplotlib.pyplot as plt
    except Exception:
        return images
    for num in plt.get_fignums():
        fig = plt.figure(num)
        buf = io.BytesIO()
        try:
            fig.savefig(buf, format="png", bbox_inches="tight", dpi=150)
            images.append(base64.b64encode(buf.getvalue()).decode("ascii"))
        except Exception:
            pass
        finally:
            plt.close(fig)
    return images

def _drain_interactive_plots(ns):
    plots = []
    try:
        import plotly.graph_objects as go
    except Exception:
        return plots
    for value in list(ns.values()):
        if isinstance(value, go.Figure) and id(value) not in _seen:
            _seen.add(id(value))
            try:
                plots.append(value.to_html(include_plotlyjs="cdn", full_html=False))
            except Exception:
                pass
    return plots

def _normalize_image(img):
    from PIL import Image
    quality = 85
    out = img
    if max(out.size) > 4096:
        out = out.copy()
        out.thumbnail((4096, 4096))
    buf = io.BytesIO()
    for q in (85, 70, 50, 30):
        buf = io.BytesIO()
        fmt = "JPEG" if out.mode != "RGBA" else "PNG"
        out.save(buf, format=fmt, quality=q)
        if buf.tell() <= 4 * 1024 * 1024:
            return base64.b64encode(buf.getvalue()).decode("ascii")
    while buf.tell() > 4 * 1024 * 1024 and max(out.size) > 512:
        out = out.resize((max(out.size[0] // 2, 512), max(out.size[1] // 2, 512)))
        buf = io.BytesIO()
        out.save(buf, format="JPEG", quality=50)
    return base64.b64encode(buf.getvalue()).decode("ascii")

def _drain_images(ns):
    images = []
    try:
        from PIL import Image
    except Exception:
        return images
    for value in list(ns.values()):
        if isinstance(value, Image.Image) and id(value) not in _seen:
            _seen.add(id(value))
            try:
                images.append(_normalize_image(value))
            except Exception:
                pass
    return images

for raw in sys.stdin:
    raw = raw.strip()
    if not raw:
        continue
    req = json.loads(raw)
    code = req.get("code", "")

    out_buf, err_buf = io.StringIO(), io.StringIO()
    old_out, old_err = sys.stdout, sys.stderr
    sys.stdout, sys.stderr = out_buf, err_buf
    try:
        exec(compile(code, "<sandbox>", "exec"), _ns)
    except Exception as exc:
        err_buf.write(f"{type(exc).__name__}: {exc}\n")
        err_buf.write(traceback.format_exc())
    finally:
        sys.stdout, sys.stderr = old_out, old_err

    images = _drain_figures()
    plots = _drain_interactive_plots(_ns)
    images.extend(_drain_images(_ns))

    response = {
        "stdout": out_buf.getvalue(),
        "stderr": err_buf.getvalue(),
        "images": images,
        "plots": plots,
    }
    sys.stdout.write(json.dumps(response) + "\n")
    sys.stdout.flush()
"#;
