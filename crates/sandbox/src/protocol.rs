//! The wire protocol between the Controller and the Driver (§3, §6): a
//! request file of newline-delimited JSON records, and one response file
//! per command id.

use sa_domain::message::ContentBlock;
use serde::{Deserialize, Serialize};

/// One line appended to the request file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequestLine {
    pub command_id: String,
    pub code: String,
}

/// The JSON object written to `RES/<command_id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Base64-encoded PNG or JPEG bytes, in figure-number-then-scan order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Self-contained HTML fragments, in variable-scan order.
    #[serde(default)]
    pub plots: Vec<String>,
}

/// Assemble the run_code tool's content-block list from a raw response
/// (§4.D, P7): one text block combining stdout/stderr, then one image
/// block per image, then one interactive-plot block per plot.
pub fn assemble_content_blocks(resp: &ExecResponse) -> Vec<ContentBlock> {
    let mut blocks = Vec::with_capacity(1 + resp.images.len() + resp.plots.len());
    blocks.push(ContentBlock::Text {
        text: text_block(resp),
    });
    for img in &resp.images {
        blocks.push(ContentBlock::image(img.clone()));
    }
    for html in &resp.plots {
        blocks.push(ContentBlock::InteractivePlot { html: html.clone() });
    }
    blocks
}

fn text_block(resp: &ExecResponse) -> String {
    let mut parts = Vec::new();
    if !resp.stdout.is_empty() {
        parts.push(format!("stdout:\n{}", resp.stdout));
    }
    if !resp.stderr.is_empty() {
        parts.push(format!("stderr:\n{}", resp.stderr));
    }
    if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n\n")
    }
}

/// Environment variables that are part of the ABI between Controller and
/// Driver (§6): both the paths and the variable names are fixed.
pub const IO_DATA_DIR_VAR: &str = "IO_DATA_DIR";
pub const STDIN_FILE_VAR: &str = "STDIN_FILE";
pub const DEFAULT_IO_DATA_DIR: &str = "/modal/io";

pub fn request_file_name() -> &'static str {
    "stdin.txt"
}

pub fn response_file_name(command_id: &str) -> String {
    format!("{command_id}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_order_is_text_then_images_then_plots() {
        let resp = ExecResponse {
            stdout: "42\n".into(),
            stderr: String::new(),
            images: vec!["iVBORsomepng".into(), "/9j/somejpeg".into()],
            plots: vec!["<div>plot</div>".into()],
        };
        let blocks = assemble_content_blocks(&resp);
        assert_eq!(blocks.len(), 4);
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
        assert!(matches!(blocks[1], ContentBlock::Image { .. }));
        assert!(matches!(blocks[2], ContentBlock::Image { .. }));
        assert!(matches!(blocks[3], ContentBlock::InteractivePlot { .. }));
    }

    #[test]
    fn text_block_reports_no_output_when_both_empty() {
        let resp = ExecResponse::default();
        assert_eq!(text_block(&resp), "(no output)");
    }

    #[test]
    fn text_block_labels_stdout_and_stderr_sections() {
        let resp = ExecResponse {
            stdout: "hi".into(),
            stderr: "warn".into(),
            ..Default::default()
        };
        assert_eq!(text_block(&resp), "stdout:\nhi\n\nstderr:\nwarn");
    }

    #[test]
    fn image_mime_sniffed_from_base64_prefix() {
        let resp = ExecResponse {
            images: vec!["iVBORpng".into()],
            ..Default::default()
        };
        let blocks = assemble_content_blocks(&resp);
        match &blocks[1] {
            ContentBlock::Image { mime, .. } => assert_eq!(mime, "image/png"),
            _ => panic!("expected image block"),
        }
    }
}
