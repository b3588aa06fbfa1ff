//! UI Snapshot Interface
//!
//! Dumps a device's view hierarchy and flattens it into the interactive
//! widgets exploration can act on. System navigation affordances
//! (back / home / recents) are never returned.

use std::path::PathBuf;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::process::Command;

use droidwalk_core::prelude::*;
use droidwalk_core::{Bounds, UiElement};

/// Resource ids of the navigation bar buttons
const SYSTEM_NAV_IDS: &[&str] = &[
    "com.android.systemui:id/back",
    "com.android.systemui:id/home",
    "com.android.systemui:id/recent_apps",
];

/// Source of raw UI hierarchy dumps
#[trait_variant::make(UiSnapshot: Send)]
pub trait LocalUiSnapshot {
    /// Raw hierarchy XML of the current screen
    async fn dump(&self) -> Result<String>;
}

/// Dump and parse in one step
pub async fn capture<S: UiSnapshot>(source: &S) -> Result<Vec<UiElement>> {
    let raw = UiSnapshot::dump(source).await?;
    parse_hierarchy(&raw)
}

fn is_system_nav(resource_id: &str) -> bool {
    SYSTEM_NAV_IDS.iter().any(|id| resource_id.contains(id))
}

fn element_from_node(e: &BytesStart<'_>) -> UiElement {
    let mut el = UiElement::default();
    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        let flag = value.as_ref() == "true";
        match attr.key.as_ref() {
            b"resource-id" => el.resource_id = value.into_owned(),
            b"class" => el.class_name = value.into_owned(),
            b"text" => el.text = value.into_owned(),
            b"content-desc" => el.content_description = value.into_owned(),
            b"bounds" => el.bounds = Bounds::parse(&value).unwrap_or_default(),
            b"clickable" => el.clickable = flag,
            b"long-clickable" => el.long_clickable = flag,
            b"checkable" => el.checkable = flag,
            b"scrollable" => el.scrollable = flag,
            _ => {}
        }
    }
    el
}

/// Flatten a uiautomator hierarchy into its interactive elements, in
/// document order
pub fn parse_hierarchy(xml: &str) -> Result<Vec<UiElement>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut elements = Vec::new();
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"hierarchy" => saw_root = true,
                b"node" => {
                    let el = element_from_node(&e);
                    if el.is_interactive() && !is_system_nav(&el.resource_id) {
                        elements.push(el);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::hierarchy(format!(
                    "at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Error::hierarchy("no <hierarchy> root in dump"));
    }
    Ok(elements)
}

/// Cut the XML document out of `uiautomator dump /dev/tty` output, which
/// appends a status line after the closing tag
pub fn extract_hierarchy(raw: &str) -> Option<&str> {
    let start = raw.find("<?xml").or_else(|| raw.find("<hierarchy"))?;
    let end = raw.rfind("</hierarchy>")? + "</hierarchy>".len();
    (end > start).then(|| &raw[start..end])
}

/// `uiautomator` over adb
#[derive(Debug, Clone)]
pub struct UiAutomator {
    serial: String,
    adb: PathBuf,
}

impl UiAutomator {
    pub fn new(serial: impl Into<String>, adb: impl Into<PathBuf>) -> Self {
        Self {
            serial: serial.into(),
            adb: adb.into(),
        }
    }
}

impl UiSnapshot for UiAutomator {
    async fn dump(&self) -> Result<String> {
        dump_hierarchy(&self.adb, &self.serial).await
    }
}

/// Run `uiautomator dump` on `serial` and return the bare XML
pub(crate) async fn dump_hierarchy(adb: &std::path::Path, serial: &str) -> Result<String> {
    let output = Command::new(adb)
        .args(["-s", serial, "exec-out", "uiautomator", "dump", "/dev/tty"])
        .output()
        .await
        .map_err(|e| Error::device(serial, format!("Failed to run uiautomator: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    match extract_hierarchy(&stdout) {
        Some(xml) => Ok(xml.to_string()),
        None => {
            let detail = stdout.lines().last().unwrap_or_default().trim().to_string();
            debug!("uiautomator dump on {} returned no hierarchy: {}", serial, detail);
            Err(Error::hierarchy(format!(
                "uiautomator dump on {} returned no hierarchy ({})",
                serial, detail
            )))
        }
    }
}
