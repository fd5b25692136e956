//! WS-Management SOAP messages for the WinRS remote shell.
//!
//! Only the handful of messages needed to run one command are covered:
//! create a shell, start a command, receive its output, terminate it, and
//! delete the shell. Responses are scanned for the few elements the client
//! needs rather than parsed into a full document.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use tracing::warn;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSA_NS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const WSMAN_MS_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
const ANONYMOUS_ADDRESS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

/// Resource URI of the cmd.exe shell
pub const SHELL_RESOURCE_URI: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";

const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

/// WSManFault code for an expired Receive operation timeout
pub const OPERATION_TIMEOUT_FAULT: &str = "2150858793";

// ============================================================================
// Message type
// ============================================================================

/// A serialized SOAP envelope, opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapMessage(String);

impl SoapMessage {
    /// Wrap an already serialized envelope.
    pub fn new(xml: impl Into<String>) -> Self {
        Self(xml.into())
    }

    /// The envelope text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SoapMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Message construction
// ============================================================================

/// Builds shell messages addressed to one endpoint.
#[derive(Debug, Clone)]
pub struct MessageFactory {
    to: String,
    max_envelope_size: u32,
    operation_timeout: String,
    locale: String,
    codepage: u32,
}

impl MessageFactory {
    /// Factory for messages sent to `to` (the WS-Management URL).
    pub fn new(
        to: impl Into<String>,
        max_envelope_size: u32,
        operation_timeout: impl Into<String>,
        locale: impl Into<String>,
        codepage: u32,
    ) -> Self {
        Self {
            to: to.into(),
            max_envelope_size,
            operation_timeout: operation_timeout.into(),
            locale: locale.into(),
            codepage,
        }
    }

    /// `Create` request for a new cmd shell.
    pub fn create_shell(&self) -> SoapMessage {
        let options = format!(
            r#"
    <w:OptionSet>
      <w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>
      <w:Option Name="WINRS_CODEPAGE">{}</w:Option>
    </w:OptionSet>"#,
            self.codepage
        );
        let body = r#"<rsp:Shell>
      <rsp:InputStreams>stdin</rsp:InputStreams>
      <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
    </rsp:Shell>"#;
        self.envelope(ACTION_CREATE, None, &options, body)
    }

    /// `Command` request running `command` with `args` in `shell_id`.
    pub fn command(&self, shell_id: &str, command: &str, args: &[&str]) -> SoapMessage {
        let options = r#"
    <w:OptionSet>
      <w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>
      <w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option>
    </w:OptionSet>"#;
        let args_xml: String = args
            .iter()
            .map(|arg| format!("<rsp:Arguments>{}</rsp:Arguments>", xml_escape(arg)))
            .collect();
        let body = format!(
            "<rsp:CommandLine>\n      <rsp:Command>{}</rsp:Command>{}\n    </rsp:CommandLine>",
            xml_escape(command),
            args_xml
        );
        self.envelope(ACTION_COMMAND, Some(shell_id), options, &body)
    }

    /// `Receive` request for the stdout and stderr of `command_id`.
    pub fn receive(&self, shell_id: &str, command_id: &str) -> SoapMessage {
        let body = format!(
            r#"<rsp:Receive>
      <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
    </rsp:Receive>"#,
            xml_escape(command_id)
        );
        self.envelope(ACTION_RECEIVE, Some(shell_id), "", &body)
    }

    /// `Signal` request terminating `command_id`.
    pub fn signal_terminate(&self, shell_id: &str, command_id: &str) -> SoapMessage {
        let body = format!(
            r#"<rsp:Signal CommandId="{}">
      <rsp:Code>{SIGNAL_TERMINATE}</rsp:Code>
    </rsp:Signal>"#,
            xml_escape(command_id)
        );
        self.envelope(ACTION_SIGNAL, Some(shell_id), "", &body)
    }

    /// `Delete` request for `shell_id`.
    pub fn delete_shell(&self, shell_id: &str) -> SoapMessage {
        self.envelope(ACTION_DELETE, Some(shell_id), "", "")
    }

    fn envelope(
        &self,
        action: &str,
        shell_id: Option<&str>,
        options: &str,
        body: &str,
    ) -> SoapMessage {
        let selector = shell_id
            .map(|id| {
                format!(
                    r#"
    <w:SelectorSet>
      <w:Selector Name="ShellId">{}</w:Selector>
    </w:SelectorSet>"#,
                    xml_escape(id)
                )
            })
            .unwrap_or_default();
        let body = if body.is_empty() {
            "<s:Body/>".to_string()
        } else {
            format!("<s:Body>\n    {}\n  </s:Body>", body)
        };

        SoapMessage(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{SOAP_ENV_NS}" xmlns:a="{WSA_NS}" xmlns:w="{WSMAN_NS}" xmlns:p="{WSMAN_MS_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header>
    <a:To>{}</a:To>
    <w:ResourceURI s:mustUnderstand="true">{SHELL_RESOURCE_URI}</w:ResourceURI>
    <a:ReplyTo>
      <a:Address s:mustUnderstand="true">{ANONYMOUS_ADDRESS}</a:Address>
    </a:ReplyTo>
    <a:Action s:mustUnderstand="true">{}</a:Action>
    <a:MessageID>uuid:{}</a:MessageID>
    <w:MaxEnvelopeSize s:mustUnderstand="true">{}</w:MaxEnvelopeSize>
    <w:OperationTimeout>{}</w:OperationTimeout>
    <w:Locale xml:lang="{}" s:mustUnderstand="false"/>
    <p:DataLocale xml:lang="{}" s:mustUnderstand="false"/>{}{}
  </s:Header>
  {}
</s:Envelope>"#,
            xml_escape(&self.to),
            action,
            Uuid::new_v4(),
            self.max_envelope_size,
            self.operation_timeout,
            self.locale,
            self.locale,
            selector,
            options,
            body
        ))
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Output extracted from one `Receive` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOutput {
    /// Decoded stdout bytes
    pub stdout: Vec<u8>,
    /// Decoded stderr bytes
    pub stderr: Vec<u8>,
    /// Exit code, present once the command finished
    pub exit_code: Option<i32>,
    /// Whether the command reached the `Done` state
    pub done: bool,
}

/// Shell id from a `Create` response.
pub fn parse_shell_id(response: &str) -> Option<String> {
    element_text(response, "<rsp:ShellId>", "</rsp:ShellId>")
        .or_else(|| element_text(response, "<w:Selector Name=\"ShellId\">", "</w:Selector>"))
        .map(str::to_string)
}

/// Command id from a `Command` response.
pub fn parse_command_id(response: &str) -> Option<String> {
    element_text(response, "<rsp:CommandId>", "</rsp:CommandId>").map(str::to_string)
}

/// Streams, exit code and state from a `Receive` response.
pub fn parse_receive(response: &str) -> ReceiveOutput {
    let mut output = ReceiveOutput {
        done: response.contains("CommandState/Done\""),
        exit_code: element_text(response, "<rsp:ExitCode>", "</rsp:ExitCode>")
            .and_then(|code| code.parse().ok()),
        ..ReceiveOutput::default()
    };

    let mut rest = response;
    while let Some(start) = rest.find("<rsp:Stream ") {
        let tag_start = &rest[start..];
        let Some(tag_end) = tag_start.find('>') else {
            break;
        };
        let tag = &tag_start[..tag_end];
        let after_tag = &tag_start[tag_end + 1..];

        // <rsp:Stream Name="stdout" CommandId="..." End="true"/>
        if tag.ends_with('/') {
            rest = after_tag;
            continue;
        }
        let Some(content_end) = after_tag.find("</rsp:Stream>") else {
            break;
        };
        let content = after_tag[..content_end].trim();
        rest = &after_tag[content_end..];

        if content.is_empty() {
            continue;
        }
        let target = if tag.contains("Name=\"stdout\"") {
            &mut output.stdout
        } else if tag.contains("Name=\"stderr\"") {
            &mut output.stderr
        } else {
            continue;
        };
        match BASE64_STANDARD.decode(content) {
            Ok(decoded) => target.extend_from_slice(&decoded),
            Err(e) => warn!(error = %e, "Skipping undecodable output stream chunk"),
        }
    }

    output
}

/// Whether a fault body reports an expired operation timeout.
///
/// The server sends this when a `Receive` waited for output longer than the
/// requested `OperationTimeout`; the command is still running.
pub fn is_operation_timeout(response: &str) -> bool {
    response.contains(OPERATION_TIMEOUT_FAULT)
}

/// Text between the first `open` and the following `close`.
fn element_text<'a>(response: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = response.find(open)? + open.len();
    let end = response[start..].find(close)?;
    Some(response[start..start + end].trim())
}

/// Escape special characters for XML
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// ============================================================================
// Tests
// ============================================================================
