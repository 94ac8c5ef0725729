//! Manifest model and XML codec.
//!
//! The codec is event-driven so the on-disk form stays minimal and stable:
//! defaults are unfilled on write (an absent attribute means the default),
//! empty container elements are elided, childless elements are self-closing,
//! attribute order follows the schema, and output ends in a newline. With
//! those rules `write(read(x)) == x` on the canonical subset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{io_err, CoreError};
use crate::fsutil::safe_write_file;
use crate::project::{Hook, Import, LocalImport, Project};

/// The declarative inventory of projects, imports, and hooks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub imports: Vec<Import>,
    pub local_imports: Vec<LocalImport>,
    pub projects: Vec<Project>,
    pub hooks: Vec<Hook>,
}

impl Manifest {
    /// Parse a manifest from raw XML, with defaults filled in.
    pub fn from_bytes(data: &[u8]) -> Result<Manifest, CoreError> {
        let mut m = parse_manifest(data)?;
        m.fill_defaults()?;
        Ok(m)
    }

    /// Parse a manifest from `path`, with defaults filled in.
    ///
    /// Project paths are not absolutized here; the loader does that against
    /// the root it inherited for this file.
    pub fn from_file(path: &Path) -> Result<Manifest, CoreError> {
        let data = std::fs::read(path).map_err(|e| io_err(path, e))?;
        Manifest::from_bytes(&data).map_err(|e| CoreError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Serialize with defaults unfilled; does not mutate `self`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut m = self.clone();
        m.unfill_defaults()?;
        write_manifest(&m)
    }

    /// Write to `path` with defaults unfilled and project paths relative to
    /// the workspace root, so the root directory can be moved.
    pub fn to_file(&self, config: &Config, path: &Path) -> Result<(), CoreError> {
        let mut m = self.clone();
        for project in &mut m.projects {
            project.relativize_paths(&config.root)?;
        }
        let data = m.to_bytes()?;
        safe_write_file(path, &data)
    }

    fn fill_defaults(&mut self) -> Result<(), CoreError> {
        for import in &mut self.imports {
            import.fill_defaults()?;
        }
        for local in &self.local_imports {
            local.validate()?;
        }
        for project in &mut self.projects {
            project.fill_defaults()?;
        }
        Ok(())
    }

    fn unfill_defaults(&mut self) -> Result<(), CoreError> {
        for import in &mut self.imports {
            import.unfill_defaults()?;
        }
        for local in &self.local_imports {
            local.validate()?;
        }
        for project in &mut self.projects {
            project.unfill_defaults()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-project metadata
// ---------------------------------------------------------------------------

/// Parse a single-project metadata file, with defaults filled in and paths
/// absolutized against the workspace root.
pub fn project_from_file(config: &Config, path: &Path) -> Result<Project, CoreError> {
    let data = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let mut project = parse_single_project(&data).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    project.fill_defaults()?;
    project.absolutize_paths(&config.root);
    Ok(project)
}

/// Write a single-project metadata file, with defaults unfilled and paths
/// relative to the workspace root.
pub fn project_to_file(config: &Config, project: &Project, path: &Path) -> Result<(), CoreError> {
    let mut p = project.clone();
    p.unfill_defaults()?;
    p.relativize_paths(&config.root)?;

    let mut writer = Writer::new(Vec::new());
    write_project(&mut writer, &p)?;
    let mut data = writer.into_inner();
    data.push(b'\n');
    safe_write_file(path, &data)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn parse_manifest(data: &[u8]) -> Result<Manifest, CoreError> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    let mut m = Manifest::default();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| CoreError::Xml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => match e.name().as_ref() {
                b"import" => m.imports.push(parse_import(e)?),
                b"localimport" => m.local_imports.push(parse_local_import(e)?),
                b"project" => m.projects.push(parse_project(e)?),
                b"hook" => m.hooks.push(parse_hook(e)?),
                // Container elements and unknown extensions are skipped.
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(m)
}

fn parse_single_project(data: &[u8]) -> Result<Project, CoreError> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| CoreError::Xml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.name().as_ref() == b"project" => {
                return parse_project(e);
            }
            Event::Eof => {
                return Err(CoreError::Xml("no <project> element found".to_owned()));
            }
            _ => {}
        }
        buf.clear();
    }
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, CoreError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CoreError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| CoreError::Xml(e.to_string()))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn parse_import(e: &BytesStart<'_>) -> Result<Import, CoreError> {
    let mut attrs = attributes(e)?;
    Ok(Import {
        manifest: attrs.remove("manifest").unwrap_or_default(),
        name: attrs.remove("name").unwrap_or_default(),
        remote: attrs.remove("remote").unwrap_or_default(),
        remote_branch: attrs.remove("remotebranch").unwrap_or_default(),
        root: attrs.remove("root").unwrap_or_default(),
    })
}

fn parse_local_import(e: &BytesStart<'_>) -> Result<LocalImport, CoreError> {
    let mut attrs = attributes(e)?;
    Ok(LocalImport {
        file: PathBuf::from(attrs.remove("file").unwrap_or_default()),
    })
}

fn parse_project(e: &BytesStart<'_>) -> Result<Project, CoreError> {
    let mut attrs = attributes(e)?;
    Ok(Project {
        name: attrs.remove("name").unwrap_or_default(),
        path: PathBuf::from(attrs.remove("path").unwrap_or_default()),
        remote: attrs.remove("remote").unwrap_or_default(),
        remote_branch: attrs.remove("remotebranch").unwrap_or_default(),
        revision: attrs.remove("revision").unwrap_or_default(),
        gerrit_host: attrs.remove("gerrithost").filter(|s| !s.is_empty()),
        git_hooks: attrs
            .remove("githooks")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        computed_key: None,
    })
}

fn parse_hook(e: &BytesStart<'_>) -> Result<Hook, CoreError> {
    let mut attrs = attributes(e)?;
    Ok(Hook {
        name: attrs.remove("name").unwrap_or_default(),
        action: PathBuf::from(attrs.remove("action").unwrap_or_default()),
        project_name: attrs.remove("project").unwrap_or_default(),
        action_path: PathBuf::new(),
    })
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

fn write_manifest(m: &Manifest) -> Result<Vec<u8>, CoreError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_event(&mut writer, Event::Start(BytesStart::new("manifest")))?;

    if !m.imports.is_empty() || !m.local_imports.is_empty() {
        write_event(&mut writer, Event::Start(BytesStart::new("imports")))?;
        for import in &m.imports {
            let mut e = BytesStart::new("import");
            push_attr(&mut e, "manifest", &import.manifest);
            push_attr(&mut e, "name", &import.name);
            push_attr(&mut e, "remote", &import.remote);
            push_attr(&mut e, "remotebranch", &import.remote_branch);
            push_attr(&mut e, "root", &import.root);
            write_event(&mut writer, Event::Empty(e))?;
        }
        for local in &m.local_imports {
            let mut e = BytesStart::new("localimport");
            push_attr(&mut e, "file", &local.file.to_string_lossy());
            write_event(&mut writer, Event::Empty(e))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("imports")))?;
    }

    if !m.projects.is_empty() {
        write_event(&mut writer, Event::Start(BytesStart::new("projects")))?;
        for project in &m.projects {
            write_project(&mut writer, project)?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("projects")))?;
    }

    if !m.hooks.is_empty() {
        write_event(&mut writer, Event::Start(BytesStart::new("hooks")))?;
        for hook in &m.hooks {
            let mut e = BytesStart::new("hook");
            push_attr(&mut e, "name", &hook.name);
            push_attr(&mut e, "action", &hook.action.to_string_lossy());
            push_attr(&mut e, "project", &hook.project_name);
            write_event(&mut writer, Event::Empty(e))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("hooks")))?;
    }

    write_event(&mut writer, Event::End(BytesEnd::new("manifest")))?;
    let mut data = writer.into_inner();
    data.push(b'\n');
    Ok(data)
}

fn write_project<W: std::io::Write>(
    writer: &mut Writer<W>,
    project: &Project,
) -> Result<(), CoreError> {
    let mut e = BytesStart::new("project");
    push_attr(&mut e, "name", &project.name);
    push_attr(&mut e, "path", &project.path.to_string_lossy());
    push_attr(&mut e, "remote", &project.remote);
    push_attr(&mut e, "remotebranch", &project.remote_branch);
    push_attr(&mut e, "revision", &project.revision);
    if let Some(host) = &project.gerrit_host {
        push_attr(&mut e, "gerrithost", host);
    }
    if let Some(hooks) = &project.git_hooks {
        push_attr(&mut e, "githooks", &hooks.to_string_lossy());
    }
    write_event(writer, Event::Empty(e))
}

fn push_attr(e: &mut BytesStart<'_>, key: &str, value: &str) {
    if !value.is_empty() {
        e.push_attribute((key, value));
    }
}

fn write_event<W: std::io::Write>(
    writer: &mut Writer<W>,
    event: Event<'_>,
) -> Result<(), CoreError> {
    writer
        .write_event(event)
        .map_err(|e| CoreError::Xml(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
