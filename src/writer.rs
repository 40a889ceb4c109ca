use std::io::{self, Write};

use log::warn;

use crate::Result;
use crate::object::{Dictionary, Object, StringFormat};

/// Serializes objects into PDF syntax.
pub struct Writer;

impl Writer {
    fn need_separator(object: &Object) -> bool {
        matches!(
            object,
            Object::Null | Object::Boolean(_) | Object::Integer(_) | Object::Real(_) | Object::Reference(_)
        )
    }

    pub fn write_object(file: &mut dyn Write, object: &Object) -> Result<()> {
        match object {
            Object::Null => file.write_all(b"null")?,
            Object::Boolean(value) => file.write_all(if *value { &b"true"[..] } else { &b"false"[..] })?,
            Object::Integer(value) => Writer::write_integer(file, *value)?,
            Object::Real(value) => Writer::write_real(file, *value)?,
            Object::Name(name) => Writer::write_name(file, name)?,
            Object::String(text, format) => Writer::write_string(file, text, *format)?,
            Object::Array(array) => Writer::write_array(file, array)?,
            Object::Dictionary(dict) => Writer::write_dictionary(file, dict)?,
            Object::Stream(stream) => {
                let content = stream.raw_content()?;
                Writer::write_stream(file, &stream.dict, &content)?
            }
            Object::Reference(id) => write!(file, "{} {} R", id.0, id.1)?,
        }
        Ok(())
    }

    pub fn write_integer(file: &mut dyn Write, value: i64) -> io::Result<()> {
        let mut buffer = itoa::Buffer::new();
        file.write_all(buffer.format(value).as_bytes())
    }

    /// Writes the shortest decimal that parses back to `value`.
    /// PDF has no exponent syntax, so the plain positional form is always used.
    pub fn write_real(file: &mut dyn Write, value: f64) -> io::Result<()> {
        if !value.is_finite() {
            warn!("replacing non-finite number {value} with 0");
            return file.write_all(b"0");
        }
        if value == 0.0 {
            // Also catches -0.0.
            return file.write_all(b"0");
        }
        let text = value.to_string();
        file.write_all(text.as_bytes())?;
        if value.abs() >= 1e15 && !text.contains('.') {
            // Keeps the token a real when read back; it may not fit an integer.
            file.write_all(b".0")?;
        }
        Ok(())
    }

    pub fn write_name(file: &mut dyn Write, name: &[u8]) -> io::Result<()> {
        file.write_all(b"/")?;
        for &byte in name {
            // white-space and delimiter chars are encoded to # sequences
            // also encode bytes outside of the range 33 (!) to 126 (~)
            if b" \t\n\r\x0C()<>[]{}/%#".contains(&byte) || !(33..=126).contains(&byte) {
                write!(file, "#{byte:02X}")?;
            } else {
                file.write_all(&[byte])?;
            }
        }
        Ok(())
    }

    pub fn write_string(file: &mut dyn Write, text: &[u8], format: StringFormat) -> io::Result<()> {
        match format {
            // Within a literal string, backslash and unbalanced parentheses have to be escaped.
            // A bare end-of-line inside a literal reads back as \n, so \r is escaped as well.
            StringFormat::Literal => {
                let mut escaped = vec![false; text.len()];
                let mut open = Vec::new();
                for (index, &byte) in text.iter().enumerate() {
                    match byte {
                        b'(' => open.push(index),
                        b')' => {
                            if open.pop().is_none() {
                                escaped[index] = true;
                            }
                        }
                        b'\\' | b'\r' => escaped[index] = true,
                        _ => {}
                    }
                }
                for index in open {
                    escaped[index] = true;
                }

                file.write_all(b"(")?;
                for (&byte, &escape) in text.iter().zip(&escaped) {
                    if escape {
                        file.write_all(&[b'\\', if byte == b'\r' { b'r' } else { byte }])?;
                    } else {
                        file.write_all(&[byte])?;
                    }
                }
                file.write_all(b")")?;
            }
            StringFormat::Hexadecimal => {
                file.write_all(b"<")?;
                for &byte in text {
                    write!(file, "{byte:02X}")?;
                }
                file.write_all(b">")?;
            }
        }
        Ok(())
    }

    fn write_array(file: &mut dyn Write, array: &[Object]) -> Result<()> {
        file.write_all(b"[")?;
        let mut first = true;
        for object in array {
            if first {
                first = false;
            } else if Writer::need_separator(object) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, object)?;
        }
        file.write_all(b"]")?;
        Ok(())
    }

    pub fn write_dictionary(file: &mut dyn Write, dictionary: &Dictionary) -> Result<()> {
        file.write_all(b"<<")?;
        for (key, value) in dictionary {
            Writer::write_name(file, key)?;
            if Writer::need_separator(value) {
                file.write_all(b" ")?;
            }
            Writer::write_object(file, value)?;
        }
        file.write_all(b">>")?;
        Ok(())
    }

    /// Writes `dict` followed by `content` framed by `stream`/`endstream`.
    /// `dict` must already carry the final `/Length`.
    pub fn write_stream(file: &mut dyn Write, dict: &Dictionary, content: &[u8]) -> Result<()> {
        Writer::write_dictionary(file, dict)?;
        file.write_all(b"\nstream\n")?;
        file.write_all(content)?;
        file.write_all(b"\nendstream")?;
        Ok(())
    }

    /// Serializes `object` into a fresh buffer.
    pub fn to_bytes(object: &Object) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        Writer::write_object(&mut buffer, object)?;
        Ok(buffer)
    }
}

pub struct CountingWrite<W: Write> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> CountingWrite<W> {
    pub fn new(inner: W) -> Self {
        CountingWrite {
            inner,
            bytes_written: 0,
        }
    }

    /// Starts counting at `offset`, for output that continues an existing file.
    pub fn with_offset(inner: W, offset: u64) -> Self {
        CountingWrite {
            inner,
            bytes_written: offset,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWrite<W> {
    #[inline]
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        let bytes = self.inner.write(buffer)?;
        self.bytes_written += bytes as u64;
        Ok(bytes)
    }

    #[inline]
    fn write_all(&mut self, buffer: &[u8]) -> io::Result<()> {
        // If this returns `Err` we can't know how many bytes were actually written (if any)
        // but that doesn't matter since we're gonna abort the entire PDF generation anyway.
        self.bytes_written += buffer.len() as u64;
        self.inner.write_all(buffer)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(object: &Object) -> String {
        String::from_utf8(Writer::to_bytes(object).unwrap()).unwrap()
    }

    #[test]
    fn catalog_has_minimal_separators() {
        let catalog = dictionary! { "Type" => "Catalog", "Pages" => Object::Reference((2, 0)) };
        assert_eq!(serialize(&catalog.into()), "<</Type/Catalog/Pages 2 0 R>>");
    }

    #[test]
    fn reals_use_shortest_fixed_form() {
        assert_eq!(serialize(&Object::Real(0.5)), "0.5");
        assert_eq!(serialize(&Object::Real(1.0)), "1");
        assert_eq!(serialize(&Object::Real(-0.0)), "0");
        assert_eq!(serialize(&Object::Real(0.1 + 0.2)), "0.30000000000000004");
        assert_eq!(serialize(&Object::Real(1e-7)), "0.0000001");
        assert_eq!(serialize(&Object::Real(f64::NAN)), "0");
        assert_eq!(serialize(&Object::Real(1e20)), "100000000000000000000.0");
        assert_eq!(serialize(&Object::Real(-2.5e15)), "-2500000000000000.0");
    }

    #[test]
    fn object_tree_parses_back() {
        use crate::parser::{ParserInput, direct_object};

        let tree = Object::Array(vec![
            Object::string_literal(b"paren ( ) (( back\\slash \r\n tab\t \xff".to_vec()),
            Object::string_literal(""),
            Object::string_hex(vec![0x00, 0xab, 0xff, b')']),
            Object::Name(b"A#B c/d\x80".to_vec()),
            Object::Real(0.001),
            Object::Real(-12.75),
            Object::Real(1e15),
            Object::Real(1e20),
            Object::Real(-3.5e18),
            Object::Real(1.5e300),
            Object::Integer(i64::MIN),
            Object::Boolean(true),
            Object::Null,
            Object::Reference((12, 3)),
            Object::Array(vec![]),
            Object::Array(vec![Object::Array(vec![1.into(), "N".into()]), Object::Null]),
            Object::Dictionary(dictionary! {
                "Type" => "Test",
                "Nested" => dictionary! {
                    "Kids" => vec![Object::Reference((1, 0)), Object::Reference((2, 0))],
                    "Flag" => false,
                    "Text" => Object::string_literal("(unbalanced"),
                },
                "Empty" => Dictionary::new(),
            }),
        ]);

        let bytes = Writer::to_bytes(&tree).unwrap();
        let parsed = direct_object(ParserInput::new_extra(&bytes, "round trip"));
        assert_eq!(parsed, Some(tree), "{}", String::from_utf8_lossy(&bytes));
    }

    #[test]
    fn names_escape_delimiters() {
        assert_eq!(serialize(&Object::Name(b"name \t#".to_vec())), "/name#20#09#23");
    }

    #[test]
    fn literal_strings_escape_unbalanced_parentheses() {
        let text = Object::string_literal("text((\r)");
        assert_eq!(serialize(&text), "(text\\((\\r))");
        assert_eq!(serialize(&Object::string_literal("a)b\\")), "(a\\)b\\\\)");
    }

    #[test]
    fn hex_strings_are_upper_case() {
        assert_eq!(serialize(&Object::string_hex(vec![0xab, 0x01])), "<AB01>");
    }

    #[test]
    fn arrays_separate_only_numbers() {
        let array = Object::Array(vec![1.into(), 2.into(), "A".into(), "B".into(), Object::Null]);
        assert_eq!(serialize(&array), "[1 2/A/B null]");
    }

    #[test]
    fn counting_write_counts_bytes() {
        let mut counter = CountingWrite::new(Vec::new());
        counter.write_all(b"%PDF-1.4\n").unwrap();
        assert_eq!(counter.bytes_written(), 9);
        let counter = CountingWrite::with_offset(Vec::new(), 100);
        assert_eq!(counter.bytes_written(), 100);
    }
}
