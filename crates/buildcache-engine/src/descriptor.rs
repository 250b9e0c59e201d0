//! Effective descriptor canonicalization
//!
//! The effective project descriptor is XML produced by the build tool and
//! varies in ways that do not affect the build: attribute order, comments,
//! indentation, and properties explicitly excluded by configuration (build
//! timestamps and the like). Canonicalization strips all of that so equal
//! builds hash equal bytes: comments and the XML declaration are dropped,
//! attributes are sorted by name, whitespace-only text is removed, and
//! other text is preserved literally.

use buildcache_core::{Error, Result};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeSet;

/// Name of the element whose children are subject to property exclusion
const PROPERTIES_ELEMENT: &str = "properties";

/// Produce the canonical byte form of an effective descriptor.
///
/// # Errors
///
/// A descriptor that is not well-formed XML is a configuration error; the
/// driver handed the engine something it could never hash consistently.
pub fn canonicalize_descriptor(
    descriptor: &[u8],
    excluded_properties: &BTreeSet<&str>,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(descriptor);
    let mut writer = Writer::new(Vec::new());
    let mut stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::configuration(format!("malformed effective descriptor: {e}")))?;
        match event {
            Event::Start(start) => {
                let name = element_name(&start);
                if is_excluded_property(&stack, &name, excluded_properties) {
                    let end = start.to_end().into_owned();
                    reader
                        .read_to_end_into(end.name(), &mut skip_buf)
                        .map_err(|e| {
                            Error::configuration(format!("malformed effective descriptor: {e}"))
                        })?;
                    skip_buf.clear();
                } else {
                    write_sorted_start(&mut writer, &start, &name)?;
                    stack.push(name);
                }
            }
            Event::Empty(start) => {
                let name = element_name(&start);
                if !is_excluded_property(&stack, &name, excluded_properties) {
                    write_sorted_empty(&mut writer, &start, &name)?;
                }
            }
            Event::End(_) => {
                if let Some(name) = stack.pop() {
                    writer
                        .write_event(Event::End(quick_xml::events::BytesEnd::new(name)))
                        .map_err(write_error)?;
                }
            }
            Event::Text(text) => {
                let unescaped = text.unescape().map_err(|e| {
                    Error::configuration(format!("malformed effective descriptor: {e}"))
                })?;
                if !unescaped.trim().is_empty() {
                    writer
                        .write_event(Event::Text(BytesText::new(&unescaped)))
                        .map_err(write_error)?;
                }
            }
            Event::CData(cdata) => {
                writer.write_event(Event::CData(cdata)).map_err(write_error)?;
            }
            // normalized away
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::configuration(format!(
            "malformed effective descriptor: unclosed element <{}>",
            stack.join("><")
        )));
    }
    Ok(writer.into_inner())
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn is_excluded_property(stack: &[String], name: &str, excluded: &BTreeSet<&str>) -> bool {
    stack.last().map(String::as_str) == Some(PROPERTIES_ELEMENT) && excluded.contains(name)
}

fn sorted_attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr
            .map_err(|e| Error::configuration(format!("malformed descriptor attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::configuration(format!("malformed descriptor attribute: {e}")))?
            .into_owned();
        attrs.push((key, value));
    }
    attrs.sort();
    Ok(attrs)
}

fn build_element(start: &BytesStart<'_>, name: &str) -> Result<BytesStart<'static>> {
    let mut elem = BytesStart::new(name.to_string());
    for (key, value) in sorted_attributes(start)? {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(elem)
}

fn write_sorted_start(
    writer: &mut Writer<Vec<u8>>,
    start: &BytesStart<'_>,
    name: &str,
) -> Result<()> {
    let elem = build_element(start, name)?;
    writer.write_event(Event::Start(elem)).map_err(write_error)
}

fn write_sorted_empty(
    writer: &mut Writer<Vec<u8>>,
    start: &BytesStart<'_>,
    name: &str,
) -> Result<()> {
    let elem = build_element(start, name)?;
    writer.write_event(Event::Empty(elem)).map_err(write_error)
}

fn write_error(e: std::io::Error) -> Error {
    Error::configuration(format!("cannot canonicalize effective descriptor: {e}"))
}
