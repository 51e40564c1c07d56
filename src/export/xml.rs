// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Thin event helpers over `quick_xml::Writer`

use crate::error::Result;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// In-memory XML fragment or document
pub struct XmlBuilder {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlBuilder {
    /// Fragment without declaration.
    pub fn fragment() -> Self {
        Self {
            writer: Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2),
        }
    }

    /// Document starting with an XML declaration.
    pub fn document() -> Result<Self> {
        let mut builder = Self::fragment();
        builder
            .writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(builder)
    }

    pub fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.writer.write_event(Event::Start(element))?;
        Ok(self)
    }

    pub fn end(&mut self, name: &str) -> Result<&mut Self> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(self)
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<&mut Self> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.writer.write_event(Event::Empty(element))?;
        Ok(self)
    }

    /// `<name>text</name>` with the text escaped.
    pub fn text(&mut self, name: &str, text: &str) -> Result<&mut Self> {
        self.start(name, &[])?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Escaped text inside the currently open element.
    pub fn text_raw(&mut self, text: &str) -> Result<&mut Self> {
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        Ok(self)
    }

    /// `<name><![CDATA[content]]></name>`
    pub fn cdata(&mut self, name: &str, content: &str) -> Result<&mut Self> {
        self.start(name, &[])?;
        // `]]>` cannot appear inside one CDATA section, split it across two
        let parts: Vec<&str> = content.split("]]>").collect();
        let last = parts.len() - 1;
        for (i, part) in parts.into_iter().enumerate() {
            let lead = if i == 0 { "" } else { ">" };
            let tail = if i == last { "" } else { "]]" };
            let section = format!("{}{}{}", lead, part, tail);
            self.writer.write_event(Event::CData(BytesCData::new(section)))?;
        }
        self.end(name)
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.writer.into_inner().into_inner()).into_owned()
    }
}

/// Shortest decimal form of `value` with at most `decimals` fraction digits.
pub fn number(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value);
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Space separated list of numbers.
pub fn number_list(values: impl IntoIterator<Item = f64>, decimals: usize) -> String {
    values
        .into_iter()
        .map(|v| number(v, decimals))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_trims_zeros() {
        assert_eq!(number(1.5, 4), "1.5");
        assert_eq!(number(2.0, 4), "2");
        assert_eq!(number(-0.00001, 3), "0");
        assert_eq!(number(7.123456789, 6), "7.123457");
    }

    #[test]
    fn test_text_is_escaped() {
        let mut xml = XmlBuilder::fragment();
        xml.text("name", "a < b & c").unwrap();
        assert_eq!(xml.into_string(), "<name>a &lt; b &amp; c</name>");
    }

    #[test]
    fn test_cdata_splits_terminator() {
        let mut xml = XmlBuilder::fragment();
        xml.cdata("description", "<b>x</b>]]>y").unwrap();
        assert_eq!(
            xml.into_string(),
            "<description><![CDATA[<b>x</b>]]]]><![CDATA[>y]]></description>"
        );
    }

    #[test]
    fn test_nested_elements() {
        let mut xml = XmlBuilder::document().unwrap();
        xml.start("kml", &[("xmlns", "http://www.opengis.net/kml/2.2")]).unwrap();
        xml.empty("Document", &[("id", "d")]).unwrap();
        xml.end("kml").unwrap();
        let text = xml.into_string();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains("<Document id=\"d\"/>"));
        assert!(text.trim_end().ends_with("</kml>"));
    }
}
