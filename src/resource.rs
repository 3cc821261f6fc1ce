//! Resource entries and the code references published onto them.
use crate::error::{ReftrackError, Result as ReftrackResult};
use crate::source::SourceFile;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// One confirmed usage of a resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeReference {
    pub file: Arc<SourceFile>,
    /// 1-based.
    pub line_number: usize,
    /// Alternating context / matched text, always an odd count.
    pub segments: Vec<String>,
}

impl CodeReference {
    /// The highlighted parts of the line.
    pub fn matched(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().skip(1).step_by(2).map(String::as_str)
    }

    pub fn line(&self) -> String {
        self.segments.concat()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    pending: bool,
    references: Option<Arc<[CodeReference]>>,
}

/// The reference list of one entry. Readers always see a whole list: a scan
/// swaps in a new `Arc` and never edits the old one.
#[derive(Debug, Default)]
pub struct CodeReferenceSlot {
    state: RwLock<SlotState>,
}

impl CodeReferenceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published list; `None` until a scan has reached this entry.
    pub fn references(&self) -> Option<Arc<[CodeReference]>> {
        self.state.read().references.clone()
    }

    pub fn is_scanned(&self) -> bool {
        self.state.read().references.is_some()
    }

    /// True between the start of a scan and the moment it publishes here.
    pub fn is_pending(&self) -> bool {
        self.state.read().pending
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Claims the slot for scan `generation`. The previous list stays
    /// visible until the scan publishes.
    pub fn mark_pending(&self, generation: u64) {
        let mut state = self.state.write();
        if generation >= state.generation {
            state.generation = generation;
            state.pending = true;
        }
    }

    /// Replaces the list unless a newer scan has already claimed the slot.
    pub fn publish(&self, generation: u64, references: Vec<CodeReference>) -> bool {
        let mut state = self.state.write();
        if generation < state.generation {
            return false;
        }
        state.generation = generation;
        state.pending = false;
        state.references = Some(references.into());
        true
    }
}

/// A resource entry as seen by the tracker.
pub trait ResourceEntry: Send + Sync {
    /// Logical resource file name, e.g. `Resources`.
    fn container_base_name(&self) -> &str;
    fn key(&self) -> &str;
    fn code_references(&self) -> &CodeReferenceSlot;
}

#[derive(Debug)]
pub struct Resource {
    container_base_name: String,
    key: String,
    references: CodeReferenceSlot,
}

impl Resource {
    pub fn new(container_base_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container_base_name: container_base_name.into(),
            key: key.into(),
            references: CodeReferenceSlot::new(),
        }
    }
}

impl ResourceEntry for Resource {
    fn container_base_name(&self) -> &str {
        &self.container_base_name
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn code_references(&self) -> &CodeReferenceSlot {
        &self.references
    }
}

lazy_static! {
    static ref RESX_DATA: Regex = Regex::new(r"<data\b([^>]*)>").unwrap();
    static ref RESX_NAME: Regex = Regex::new(r#"\bname\s*=\s*"([^"]*)""#).unwrap();
    static ref RESX_TYPED: Regex = Regex::new(r"\b(type|mimetype)\s*=").unwrap();
    static ref XML_ENTITY: Regex =
        Regex::new(r"&(lt|gt|quot|apos|amp|#[0-9]+|#x[0-9A-Fa-f]+);").unwrap();
}

/// `Strings.de.resx` and `Strings.resx` both belong to `Strings`.
pub fn container_base_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.split_once('.') {
        Some((base, _)) => base.to_string(),
        None => file_name,
    }
}

/// Builds one entry per distinct (container, key) across all given
/// `.resx`/`.resw` and JSON resource files.
pub fn load_resources<P: AsRef<Path>>(paths: &[P]) -> ReftrackResult<Vec<Arc<Resource>>> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

    for path in paths {
        let path = path.as_ref();
        let container = container_base_name(path);
        let keys = read_resource_keys(path)?;
        log::debug!("{} keys in {}", keys.len(), path.display());
        seen.extend(keys.into_iter().map(|key| (container.clone(), key)));
    }

    Ok(seen
        .into_iter()
        .map(|(container, key)| Arc::new(Resource::new(container, key)))
        .collect())
}

fn read_resource_keys(path: &Path) -> ReftrackResult<Vec<String>> {
    let resource_error = |source: Box<dyn std::error::Error + Send + Sync>| {
        ReftrackError::ResourceFile {
            path: path.to_path_buf(),
            source,
        }
    };

    let content = fs::read_to_string(path).map_err(|e| resource_error(Box::new(e)))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "resx" | "resw" => Ok(resx_string_names(&content)),
        "json" => {
            let value: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| resource_error(Box::new(e)))?;
            let mut keys = Vec::new();
            flatten_json_keys(&value, "", &mut keys);
            Ok(keys)
        }
        other => Err(resource_error(
            format!("unsupported resource file type '.{other}'").into(),
        )),
    }
}

/// WinForms designer state (`>>button1.Name`, `$this.Text`) is not user text.
fn is_designer_metadata(name: &str) -> bool {
    name.is_empty() || name.starts_with(">>") || name.starts_with("$this.")
}

/// Names of the string entries. Entries with a `type` or `mimetype`
/// attribute hold images, files or serialized objects and are skipped.
fn resx_string_names(content: &str) -> Vec<String> {
    RESX_DATA
        .captures_iter(content)
        .filter_map(|caps| {
            let attributes = caps.get(1)?.as_str();
            if RESX_TYPED.is_match(attributes) {
                return None;
            }
            let name = decode_xml_entities(&RESX_NAME.captures(attributes)?[1]);
            (!is_designer_metadata(&name)).then_some(name)
        })
        .collect()
}

/// Decodes the predefined entities and numeric character references in one
/// pass, so `&amp;lt;` stays `&lt;`.
fn decode_xml_entities(text: &str) -> String {
    XML_ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "amp" => Some('&'),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .unwrap_or_else(|| entity[1..].parse())
                    .ok()
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn flatten_json_keys(value: &serde_json::Value, prefix: &str, keys: &mut Vec<String>) {
    let serde_json::Value::Object(map) = value else {
        if !prefix.is_empty() {
            keys.push(prefix.to_string());
        }
        return;
    };
    for (name, child) in map {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        flatten_json_keys(child, &key, keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reference(line: usize) -> CodeReference {
        CodeReference {
            file: Arc::new(SourceFile::new("a.cs")),
            line_number: line,
            segments: vec!["x ".into(), "Resources.Key".into(), ";".into()],
        }
    }

    #[test]
    fn test_slot_rejects_older_generation() {
        let slot = CodeReferenceSlot::new();
        assert!(!slot.is_scanned());

        slot.mark_pending(2);
        assert!(slot.is_pending());
        assert!(!slot.publish(1, vec![reference(1)]));
        assert!(slot.references().is_none());

        assert!(slot.publish(2, vec![reference(7)]));
        assert!(!slot.is_pending());
        assert_eq!(slot.references().unwrap()[0].line_number, 7);
    }

    #[test]
    fn test_mark_pending_keeps_previous_list() {
        let slot = CodeReferenceSlot::new();
        slot.publish(1, vec![reference(3)]);
        slot.mark_pending(2);

        assert!(slot.is_pending());
        assert_eq!(slot.references().unwrap().len(), 1);

        slot.mark_pending(1);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn test_reference_helpers() {
        let r = reference(1);
        assert_eq!(r.matched().collect::<Vec<_>>(), vec!["Resources.Key"]);
        assert_eq!(r.line(), "x Resources.Key;");
    }

    #[test]
    fn test_container_base_name() {
        assert_eq!(container_base_name(Path::new("dir/Strings.de.resx")), "Strings");
        assert_eq!(container_base_name(Path::new("Resources.resx")), "Resources");
        assert_eq!(container_base_name(Path::new("plain")), "plain");
    }

    #[test]
    fn test_load_resources_merges_cultures() {
        let dir = tempdir().unwrap();
        let neutral = dir.path().join("Resources.resx");
        let german = dir.path().join("Resources.de.resx");
        fs::write(
            &neutral,
            r#"<root>
  <data name="Greeting" xml:space="preserve"><value>Hello</value></data>
  <data name="Tom &amp; Jerry"><value>x</value></data>
  <data name="&gt;&gt;button1.Name"><value>button1</value></data>
</root>"#,
        )
        .unwrap();
        fs::write(
            &german,
            r#"<root><data name="Greeting"><value>Hallo</value></data><data name="Farewell"><value>Tschuess</value></data></root>"#,
        )
        .unwrap();

        let resources = load_resources(&[neutral, german]).unwrap();
        let keys: Vec<_> = resources.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["Farewell", "Greeting", "Tom & Jerry"]);
        assert!(resources.iter().all(|r| r.container_base_name() == "Resources"));
    }

    #[test]
    fn test_resx_skips_typed_entries_and_reads_any_attribute_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Images.resx");
        fs::write(
            &path,
            r#"<root>
  <data xml:space="preserve" name="Caption"><value>c</value></data>
  <data name="Logo" type="System.Resources.ResXFileRef, System.Windows.Forms"><value>logo.png</value></data>
  <data name="Blob" mimetype="application/x-microsoft.net.object.binary.base64"><value>AAEA</value></data>
  <data name="Don&#39;t &#x26;amp; stop"><value>x</value></data>
  <database name="NotAnEntry"/>
</root>"#,
        )
        .unwrap();

        let resources = load_resources(&[path]).unwrap();
        let keys: Vec<_> = resources.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["Caption", "Don't &amp; stop"]);
    }

    #[test]
    fn test_decode_xml_entities() {
        assert_eq!(decode_xml_entities("a &lt;b&gt; &amp;lt; &#65;&#x42;"), "a <b> &lt; AB");
        assert_eq!(decode_xml_entities("&#xD800; &bogus;"), "&#xD800; &bogus;");
    }

    #[test]
    fn test_load_json_resources_flattens_nested_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Messages.en.json");
        fs::write(&path, r#"{"Title": "t", "Errors": {"NotFound": "n", "Denied": "d"}}"#).unwrap();

        let resources = load_resources(&[path]).unwrap();
        let keys: Vec<_> = resources.iter().map(|r| r.key().to_string()).collect();
        assert_eq!(keys, vec!["Errors.Denied", "Errors.NotFound", "Title"]);
        assert_eq!(resources[0].container_base_name(), "Messages");
    }

    #[test]
    fn test_unsupported_resource_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strings.po");
        fs::write(&path, "msgid \"x\"").unwrap();
        assert!(matches!(
            load_resources(&[path]),
            Err(ReftrackError::ResourceFile { .. })
        ));
    }
}
