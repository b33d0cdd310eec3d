use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::{NoExpand, Regex};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::result_assembler::{column_candidates, lookup, ResultRow};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    /// Hundredths of a point.
    pub size: u32,
    pub bold: bool,
}

const HEADLINE: TextStyle = TextStyle { size: 1500, bold: true };
const SUBTITLE: TextStyle = TextStyle { size: 1500, bold: false };
const BODY: TextStyle = TextStyle { size: 1050, bold: false };
const DETAIL: TextStyle = TextStyle { size: 1000, bold: false };

pub struct PlaceholderRule {
    pub token: &'static str,
    pub column: &'static str,
    pub default: &'static str,
    pub style: TextStyle,
    pattern: Regex,
}

impl PlaceholderRule {
    fn new(
        token: &'static str,
        column: &'static str,
        default: &'static str,
        style: TextStyle,
        pattern: &str,
    ) -> Self {
        Self {
            token,
            column,
            default,
            style,
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    fn value<'a>(&self, row: &'a ResultRow) -> &'a str {
        lookup(row, &column_candidates(self.column)).unwrap_or(self.default)
    }
}

// Evaluated in order; the first matching rule decides the shape's style.
static PLACEHOLDER_RULES: Lazy<Vec<PlaceholderRule>> = Lazy::new(|| {
    vec![
        PlaceholderRule::new("{{nama}}", "nama", "N/A", HEADLINE, r"\{\{nama\}\}"),
        PlaceholderRule::new("{{nik}}", "nik", "N/A", HEADLINE, r"\{\{nik\}\}"),
        PlaceholderRule::new(
            "{{jabatan terakhir}}",
            "jabatan terakhir",
            "",
            SUBTITLE,
            // OCR'd or hand-edited templates sometimes split this token.
            r"(?i)\{\{\s*j\s*abatan\s*terakhir\s*\}\}",
        ),
        PlaceholderRule::new(
            "{{executive summary}}",
            "summary executive",
            "",
            BODY,
            r"\{\{executive summary\}\}",
        ),
        PlaceholderRule::new("{{education}}", "education", "", BODY, r"\{\{education\}\}"),
        PlaceholderRule::new("{{competency}}", "competency", "", BODY, r"\{\{competency\}\}"),
        PlaceholderRule::new("{{experience}}", "experience", "", DETAIL, r"\{\{experience\}\}"),
        PlaceholderRule::new(
            "{{business impact}}",
            "business impact",
            "",
            DETAIL,
            r"\{\{business impact\}\}",
        ),
    ]
});

pub const REQUIRED_PLACEHOLDERS: [&str; 6] = [
    "{{nama}}",
    "{{nik}}",
    "{{executive summary}}",
    "{{education}}",
    "{{competency}}",
    "{{experience}}",
];

static UNSAFE_FILE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static SLIDE_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ppt/slides/slide\d+\.xml$").unwrap());

/// Substitutes every matching placeholder; returns the new text and the style
/// of the first rule that matched.
pub fn substitute(text: &str, row: &ResultRow) -> Option<(String, TextStyle)> {
    let mut style = None;
    let mut output = text.to_string();

    for rule in PLACEHOLDER_RULES.iter() {
        if !rule.matches(&output) {
            continue;
        }
        style.get_or_insert(rule.style);
        let value = rule.value(row);
        output = rule
            .pattern
            .replace_all(&output, NoExpand(value))
            .into_owned();
    }

    style.map(|style| (output, style))
}

struct TemplatePart {
    name: String,
    is_dir: bool,
    data: Vec<u8>,
}

/// A `.pptx` template held in memory.
pub struct SlideTemplate {
    path: PathBuf,
    parts: Vec<TemplatePart>,
}

impl SlideTemplate {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("unable to read template {}", path.display()))?;
        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .with_context(|| format!("{} is not a valid presentation", path.display()))?;

        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let mut data = Vec::new();
            if !entry.is_dir() {
                entry.read_to_end(&mut data)?;
            }
            parts.push(TemplatePart {
                name: entry.name().to_string(),
                is_dir: entry.is_dir(),
                data,
            });
        }

        let template = Self {
            path: path.to_path_buf(),
            parts,
        };
        if template.slide_parts().next().is_none() {
            anyhow::bail!("template {} has no slides", path.display());
        }
        Ok(template)
    }

    fn slide_parts(&self) -> impl Iterator<Item = &TemplatePart> {
        self.parts
            .iter()
            .filter(|part| !part.is_dir && SLIDE_PART.is_match(&part.name))
    }

    /// Required placeholders that appear on no slide.
    pub fn missing_placeholders(&self) -> anyhow::Result<Vec<&'static str>> {
        let mut text = String::new();
        for part in self.slide_parts() {
            let xml = std::str::from_utf8(&part.data)
                .with_context(|| format!("{} is not UTF-8", part.name))?;
            for body in text_bodies(xml)? {
                text.push_str(&body);
                text.push('\n');
            }
        }

        Ok(REQUIRED_PLACEHOLDERS
            .iter()
            .copied()
            .filter(|placeholder| !text.contains(placeholder))
            .collect())
    }

    pub fn render(&self, row: &ResultRow, output_path: &Path) -> anyhow::Result<usize> {
        let file = File::create(output_path)
            .with_context(|| format!("unable to create {}", output_path.display()))?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut replaced = 0;

        for part in &self.parts {
            if part.is_dir {
                writer.add_directory(part.name.as_str(), options)?;
                continue;
            }

            writer.start_file(part.name.as_str(), options)?;
            if SLIDE_PART.is_match(&part.name) {
                let xml = std::str::from_utf8(&part.data)
                    .with_context(|| format!("{} is not UTF-8", part.name))?;
                let (rewritten, count) = rewrite_slide(xml, row)
                    .with_context(|| format!("unable to fill {}", part.name))?;
                replaced += count;
                writer.write_all(rewritten.as_bytes())?;
            } else {
                writer.write_all(&part.data)?;
            }
        }

        writer.finish()?;
        Ok(replaced)
    }
}

pub fn deck_file_name(name: &str) -> String {
    format!("Resume_{}.pptx", UNSAFE_FILE_CHARS.replace_all(name, "_"))
}

/// Renders one deck per row into `output_dir`. A row that fails is logged and
/// skipped; the paths of the decks written are returned.
pub fn render_decks(
    template: &SlideTemplate,
    rows: &[ResultRow],
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("unable to create {}", output_dir.display()))?;

    let mut written = Vec::new();
    let mut used_names = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let name = lookup(row, &column_candidates("nama"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Candidate_{}", index + 1));

        let mut file_name = deck_file_name(&name);
        let mut suffix = 2;
        while !used_names.insert(file_name.clone()) {
            file_name = deck_file_name(&format!("{name}_{suffix}"));
            suffix += 1;
        }

        let output_path = output_dir.join(&file_name);
        match template.render(row, &output_path) {
            Ok(replaced) => {
                tracing::info!(
                    deck = %file_name,
                    shapes = replaced,
                    template = %template.path.display(),
                    "presentation written"
                );
                written.push(output_path);
            }
            Err(err) => {
                tracing::error!(row = index + 1, %name, "failed to render presentation: {err:#}");
            }
        }
    }

    Ok(written)
}

fn is_text_body(name: &[u8]) -> bool {
    name == b"p:txBody" || name == b"a:txBody"
}

fn text_bodies(xml: &str) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut bodies = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if is_text_body(e.name().as_ref()) => {
                let events = collect_element(&mut reader, Event::Start(e).into_owned())?;
                bodies.push(TextBody::new(events).text()?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(bodies)
}

/// Copies the slide XML, replacing every text body that holds a placeholder.
fn rewrite_slide(xml: &str, row: &ResultRow) -> anyhow::Result<(String, usize)> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut replaced = 0;

    loop {
        match reader.read_event()? {
            Event::Start(e) if is_text_body(e.name().as_ref()) => {
                let events = collect_element(&mut reader, Event::Start(e).into_owned())?;
                let body = TextBody::new(events);
                let text = body.text()?;

                match substitute(&text, row) {
                    Some((new_text, style)) => {
                        for event in body.rebuild(&new_text, style) {
                            writer.write_event(event)?;
                        }
                        replaced += 1;
                    }
                    None => {
                        for event in body.events {
                            writer.write_event(event)?;
                        }
                    }
                }
            }
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
    }

    Ok((String::from_utf8(writer.into_inner())?, replaced))
}

/// Reads events up to and including the end tag matching `start`.
fn collect_element(
    reader: &mut Reader<&[u8]>,
    start: Event<'static>,
) -> anyhow::Result<Vec<Event<'static>>> {
    let mut events = vec![start];
    let mut depth = 1_usize;

    while depth > 0 {
        let event = reader.read_event()?;
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => anyhow::bail!("unexpected end of slide XML"),
            _ => {}
        }
        events.push(event.into_owned());
    }

    Ok(events)
}

/// The events of one `txBody` element.
struct TextBody {
    events: Vec<Event<'static>>,
}

impl TextBody {
    fn new(events: Vec<Event<'static>>) -> Self {
        Self { events }
    }

    /// Paragraph texts joined by newlines; `a:br` counts as a newline.
    fn text(&self) -> anyhow::Result<String> {
        let mut paragraphs = Vec::new();
        let mut current = String::new();
        let mut in_text = false;

        for event in &self.events {
            match event {
                Event::Start(e) if e.name().as_ref() == b"a:t" => in_text = true,
                Event::End(e) if e.name().as_ref() == b"a:t" => in_text = false,
                Event::End(e) if e.name().as_ref() == b"a:p" => {
                    paragraphs.push(std::mem::take(&mut current));
                }
                Event::Empty(e) if e.name().as_ref() == b"a:p" => paragraphs.push(String::new()),
                Event::Empty(e) if e.name().as_ref() == b"a:br" => current.push('\n'),
                Event::Text(e) if in_text => current.push_str(&e.xml_content()?),
                Event::CData(e) if in_text => current.push_str(&e.decode()?),
                Event::GeneralRef(e) if in_text => {
                    if let Some(ch) = e.resolve_char_ref()? {
                        current.push(ch);
                    } else {
                        let name = e.decode()?;
                        match resolve_predefined_entity(&name) {
                            Some(value) => current.push_str(value),
                            None => {
                                current.push('&');
                                current.push_str(&name);
                                current.push(';');
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(paragraphs.join("\n"))
    }

    /// Body properties and list style of the original, kept before the paragraphs.
    fn preamble(&self) -> &[Event<'static>] {
        let end = self
            .events
            .iter()
            .position(|event| match event {
                Event::Start(e) | Event::Empty(e) => e.name().as_ref() == b"a:p",
                _ => false,
            })
            .unwrap_or(self.events.len().saturating_sub(1));
        &self.events[1..end.max(1)]
    }

    /// Events of the first element named `name`, including its end tag.
    fn first_element(&self, name: &[u8]) -> Option<&[Event<'static>]> {
        let start = self.events.iter().position(|event| match event {
            Event::Start(e) | Event::Empty(e) => e.name().as_ref() == name,
            _ => false,
        })?;

        if let Event::Empty(_) = self.events[start] {
            return Some(&self.events[start..=start]);
        }

        let mut depth = 0_usize;
        for (offset, event) in self.events[start..].iter().enumerate() {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&self.events[start..=start + offset]);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// One paragraph per line of `text`, every run styled with `style`.
    fn rebuild(&self, text: &str, style: TextStyle) -> Vec<Event<'static>> {
        let paragraph_properties = self.first_element(b"a:pPr").unwrap_or(&[]);
        let run_properties = styled_run_properties(self.first_element(b"a:rPr"), style);
        let end_properties = styled_end_properties(style);

        let mut events = Vec::new();
        events.push(self.events[0].clone());
        events.extend(self.preamble().iter().cloned());

        for line in text.split('\n') {
            events.push(Event::Start(BytesStart::new("a:p")));
            events.extend(paragraph_properties.iter().cloned());
            if !line.is_empty() {
                events.push(Event::Start(BytesStart::new("a:r")));
                events.extend(run_properties.iter().cloned());
                events.push(Event::Start(BytesStart::new("a:t")));
                events.push(Event::Text(BytesText::new(line).into_owned()));
                events.push(Event::End(BytesEnd::new("a:t")));
                events.push(Event::End(BytesEnd::new("a:r")));
            }
            events.push(end_properties.clone());
            events.push(Event::End(BytesEnd::new("a:p")));
        }

        if let Some(end) = self.events.last() {
            events.push(end.clone());
        }
        events
    }
}

fn style_attributes(element: &mut BytesStart<'static>, style: TextStyle) {
    element.push_attribute(("sz", style.size.to_string().as_str()));
    element.push_attribute(("b", if style.bold { "1" } else { "0" }));
}

/// The template's first run properties with size and weight replaced.
fn styled_run_properties(template: Option<&[Event<'static>]>, style: TextStyle) -> Vec<Event<'static>> {
    let Some((first, rest)) = template.and_then(|events| events.split_first()) else {
        let mut element = BytesStart::new("a:rPr");
        element.push_attribute(("lang", "id-ID"));
        style_attributes(&mut element, style);
        element.push_attribute(("dirty", "0"));
        return vec![Event::Empty(element)];
    };

    let (original, is_empty) = match first {
        Event::Start(e) => (e, false),
        Event::Empty(e) => (e, true),
        _ => return Vec::new(),
    };

    let mut element = BytesStart::new("a:rPr");
    for attribute in original.attributes().flatten() {
        let key = attribute.key.as_ref();
        if key != b"sz" && key != b"b" {
            element.push_attribute((key, attribute.value.as_ref()));
        }
    }
    style_attributes(&mut element, style);

    if is_empty {
        vec![Event::Empty(element)]
    } else {
        let mut events = vec![Event::Start(element)];
        events.extend(rest.iter().cloned());
        events
    }
}

fn styled_end_properties(style: TextStyle) -> Event<'static> {
    let mut element = BytesStart::new("a:endParaRPr");
    element.push_attribute(("lang", "id-ID"));
    style_attributes(&mut element, style);
    element.push_attribute(("dirty", "0"));
    Event::Empty(element)
}
