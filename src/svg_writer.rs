//! Minimal indenting SVG writer with escaping.

use std::borrow::Cow;
use std::fmt::Write as _;

/// Escape character data.
pub fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escape an attribute value for double quotes.
pub fn escape_attr(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Format a coordinate with at most two decimals and no trailing zeros.
pub fn num(v: f64) -> String {
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

/// Ordered attribute list.
#[derive(Debug, Clone, Default)]
pub struct Attrs(Vec<(String, String)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.0.push((name.to_string(), value.into()));
        self
    }

    pub fn num(self, name: &str, value: f64) -> Self {
        self.with(name, num(value))
    }

    pub fn opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    fn render(&self, out: &mut String) {
        for (name, value) in &self.0 {
            let _ = write!(out, " {}=\"{}\"", name, escape_attr(value));
        }
    }
}

#[derive(Debug, Default)]
pub struct SvgWriter {
    buf: String,
    depth: usize,
}

impl SvgWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    pub fn open(&mut self, name: &str, attrs: Attrs) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        attrs.render(&mut self.buf);
        self.buf.push_str(">\n");
        self.depth += 1;
    }

    pub fn close(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = writeln!(self.buf, "</{name}>");
    }

    pub fn empty(&mut self, name: &str, attrs: Attrs) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        attrs.render(&mut self.buf);
        self.buf.push_str("/>\n");
    }

    /// `<name attrs>text</name>` on one line.
    pub fn text(&mut self, name: &str, attrs: Attrs, text: &str) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        attrs.render(&mut self.buf);
        let _ = writeln!(self.buf, ">{}</{name}>", escape_text(text));
    }

    /// Multi-line text on one source line: one `<tspan>` per line, each
    /// restarting at `x` and stepping down by `advance`.
    pub fn text_lines(&mut self, name: &str, attrs: Attrs, x: f64, advance: f64, lines: &[String]) {
        self.indent();
        self.buf.push('<');
        self.buf.push_str(name);
        attrs.render(&mut self.buf);
        self.buf.push('>');
        for (i, line) in lines.iter().enumerate() {
            let dy = if i == 0 { 0.0 } else { advance };
            let _ = write!(
                self.buf,
                "<tspan x=\"{}\" dy=\"{}\">{}</tspan>",
                num(x),
                num(dy),
                escape_text(line)
            );
        }
        let _ = writeln!(self.buf, "</{name}>");
    }

    /// Already-serialized markup, written as-is on its own line.
    pub fn raw(&mut self, markup: &str) {
        if markup.trim().is_empty() {
            return;
        }
        self.indent();
        self.buf.push_str(markup.trim());
        self.buf.push('\n');
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_compact() {
        assert_eq!(num(750.0), "750");
        assert_eq!(num(94.5), "94.5");
        assert_eq!(num(1.0 / 3.0), "0.33");
        assert_eq!(num(-0.001), "0");
    }

    #[test]
    fn writes_escaped_markup() {
        let mut w = SvgWriter::new();
        w.open("g", Attrs::new().with("id", "a\"b"));
        w.text("text", Attrs::new().num("x", 10.0), "Fish & <Chips>");
        w.close("g");
        assert_eq!(
            w.finish(),
            "<g id=\"a&quot;b\">\n  <text x=\"10\">Fish &amp; &lt;Chips&gt;</text>\n</g>\n"
        );
    }
}
