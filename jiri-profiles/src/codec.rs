//! XML codec for the profiles manifest.
//!
//! ```xml
//! <profiles>
//!   <profile name="go" root="third_party/go">
//!     <target tag="t1" arch="amd64" os="linux" installation-directory="..."
//!             version="1.9" date="2018-01-02T03:04:05Z">
//!       <envvars>
//!         <var>GOARCH=amd64</var>
//!       </envvars>
//!     </target>
//!   </profile>
//! </profiles>
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::{Profile, ProfileError, Target};

pub(crate) fn parse(data: &[u8]) -> Result<Vec<Profile>, ProfileError> {
    let mut reader = Reader::from_reader(data);
    let mut buf = Vec::new();

    let mut profiles = Vec::new();
    let mut profile: Option<Profile> = None;
    let mut target: Option<Target> = None;
    let mut in_var = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ProfileError::Xml(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let empty = matches!(&event, Event::Empty(_));
                match e.name().as_ref() {
                    b"profile" => {
                        let parsed = parse_profile(e)?;
                        if empty {
                            profiles.push(parsed);
                        } else {
                            profile = Some(parsed);
                        }
                    }
                    b"target" => {
                        let parsed = parse_target(e)?;
                        if empty {
                            if let Some(p) = profile.as_mut() {
                                p.targets.push(parsed);
                            }
                        } else {
                            target = Some(parsed);
                        }
                    }
                    b"var" if !empty => in_var = true,
                    _ => {}
                }
            }
            Event::Text(ref t) if in_var => {
                let value = t
                    .unescape()
                    .map_err(|e| ProfileError::Xml(e.to_string()))?
                    .into_owned();
                if let Some(target) = target.as_mut() {
                    target.env.push(value);
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"var" => in_var = false,
                b"target" => {
                    if let (Some(p), Some(t)) = (profile.as_mut(), target.take()) {
                        p.targets.push(t);
                    }
                }
                b"profile" => {
                    if let Some(p) = profile.take() {
                        profiles.push(p);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(profiles)
}

fn parse_profile(e: &BytesStart<'_>) -> Result<Profile, ProfileError> {
    let mut profile = Profile {
        name: String::new(),
        root: String::new(),
        targets: Vec::new(),
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ProfileError::Xml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| ProfileError::Xml(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"name" => profile.name = value,
            b"root" => profile.root = value,
            _ => {}
        }
    }
    Ok(profile)
}

fn parse_target(e: &BytesStart<'_>) -> Result<Target, ProfileError> {
    let mut target = Target::new("");
    target.update_time = DateTime::<Utc>::UNIX_EPOCH;
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ProfileError::Xml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| ProfileError::Xml(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"tag" => target.tag = value,
            b"arch" => target.arch = value,
            b"os" => target.os = value,
            b"installation-directory" => target.installation_dir = value.into(),
            b"version" => target.version = value,
            b"date" => {
                target.update_time = DateTime::parse_from_rfc3339(&value)
                    .map_err(|e| ProfileError::Xml(format!("bad date {value:?}: {e}")))?
                    .with_timezone(&Utc);
            }
            _ => {}
        }
    }
    Ok(target)
}

pub(crate) fn serialize(profiles: &[Profile]) -> Result<Vec<u8>, ProfileError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Start(BytesStart::new("profiles")))
        .map_err(|e| ProfileError::Xml(e.to_string()))?;
    for profile in profiles {
        let mut p = BytesStart::new("profile");
        p.push_attribute(("name", profile.name.as_str()));
        p.push_attribute(("root", profile.root.as_str()));
        if profile.targets.is_empty() {
            writer.write_event(Event::Empty(p)).map_err(|e| ProfileError::Xml(e.to_string()))?;
            continue;
        }
        writer.write_event(Event::Start(p)).map_err(|e| ProfileError::Xml(e.to_string()))?;
        for target in &profile.targets {
            let mut t = BytesStart::new("target");
            t.push_attribute(("tag", target.tag.as_str()));
            t.push_attribute(("arch", target.arch.as_str()));
            t.push_attribute(("os", target.os.as_str()));
            t.push_attribute((
                "installation-directory",
                target.installation_dir.to_string_lossy().as_ref(),
            ));
            t.push_attribute(("version", target.version.as_str()));
            t.push_attribute((
                "date",
                target
                    .update_time
                    .to_rfc3339_opts(SecondsFormat::Secs, true)
                    .as_str(),
            ));
            if target.env.is_empty() {
                writer.write_event(Event::Empty(t)).map_err(|e| ProfileError::Xml(e.to_string()))?;
                continue;
            }
            writer.write_event(Event::Start(t)).map_err(|e| ProfileError::Xml(e.to_string()))?;
            writer
                .write_event(Event::Start(BytesStart::new("envvars")))
                .map_err(|e| ProfileError::Xml(e.to_string()))?;
            for var in &target.env {
                writer
                    .write_event(Event::Start(BytesStart::new("var")))
                    .map_err(|e| ProfileError::Xml(e.to_string()))?;
                writer
                    .write_event(Event::Text(BytesText::new(var)))
                    .map_err(|e| ProfileError::Xml(e.to_string()))?;
                writer
                    .write_event(Event::End(BytesEnd::new("var")))
                    .map_err(|e| ProfileError::Xml(e.to_string()))?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("envvars")))
                .map_err(|e| ProfileError::Xml(e.to_string()))?;
            writer
                .write_event(Event::End(BytesEnd::new("target")))
                .map_err(|e| ProfileError::Xml(e.to_string()))?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("profile")))
            .map_err(|e| ProfileError::Xml(e.to_string()))?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("profiles")))
        .map_err(|e| ProfileError::Xml(e.to_string()))?;

    let mut data = writer.into_inner();
    data.push(b'\n');
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_profiles() {
        let profiles = vec![Profile {
            name: "go".to_owned(),
            root: "third_party/go".to_owned(),
            targets: vec![Target {
                arch: "amd64".to_owned(),
                os: "linux".to_owned(),
                installation_dir: "/opt/go".into(),
                version: "1.9".to_owned(),
                env: vec!["GOARCH=amd64".to_owned(), "GOOS=linux".to_owned()],
                ..Target::new("t1")
            }],
        }];
        let data = serialize(&profiles).unwrap();
        let back = parse(&data).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].name, "go");
        assert_eq!(back[0].targets[0].tag, "t1");
        assert_eq!(back[0].targets[0].env.len(), 2);
    }

    #[test]
    fn date_is_rfc3339() {
        let mut target = Target::new("t1");
        target.update_time = DateTime::parse_from_rfc3339("2018-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let profiles = vec![Profile {
            name: "p".to_owned(),
            root: String::new(),
            targets: vec![target],
        }];
        let out = String::from_utf8(serialize(&profiles).unwrap()).unwrap();
        assert!(out.contains(r#"date="2018-01-02T03:04:05Z""#), "{out}");
        let back = parse(out.as_bytes()).unwrap();
        assert_eq!(
            back[0].targets[0].update_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            "2018-01-02T03:04:05Z"
        );
    }

    #[test]
    fn profile_without_targets_is_self_closing() {
        let profiles = vec![Profile {
            name: "empty".to_owned(),
            root: "r".to_owned(),
            targets: Vec::new(),
        }];
        let out = String::from_utf8(serialize(&profiles).unwrap()).unwrap();
        assert!(out.contains(r#"<profile name="empty" root="r"/>"#), "{out}");
    }
}
