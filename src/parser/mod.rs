use std::collections::HashSet;
use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of, space0};
use nom::combinator::{map, map_opt, map_res, opt, verify};
use nom::error::{ErrorKind, ParseError as _};
use nom::multi::{fold_many0, fold_many1, many0, many0_count};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated};
use nom::{AsBytes, AsChar, IResult, Input, Parser};
use nom_locate::LocatedSpan;

use crate::error::{ParseError, XrefError};
use crate::reader::Loader;
use crate::xref::{Xref, XrefEntry};
use crate::{Dictionary, Error, Object, ObjectId, Result, Stream, StringFormat};

/// Parser input. Offsets reported by `location_offset` are absolute within the source.
pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;
pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

/// Maximum nesting of parentheses inside a literal string.
pub const MAX_BRACKET: usize = 100;

#[inline]
fn strip_nom<O>(r: NomResult<O>) -> Option<O> {
    r.ok().map(|(_, o)| o)
}

#[inline]
fn parse_ascii<T: FromStr>(bytes: &[u8]) -> Option<T> {
    str::from_utf8(bytes).ok()?.parse().ok()
}

fn failure(input: ParserInput, kind: ErrorKind) -> nom::Err<NomError> {
    nom::Err::Failure(NomError::from_error_kind(input, kind))
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

pub(crate) fn comment(input: ParserInput) -> NomResult<()> {
    map(
        (tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), eol),
        |_| (),
    )
    .parse(input)
}

#[inline]
fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    )
    .parse(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    map_opt(
        nom::combinator::recognize(pair(opt(one_of("+-")), digit1)),
        |digits: ParserInput| parse_ascii(digits.fragment()),
    )
    .parse(input)
}

/// Digits too large for an `i64`, read as a real.
fn oversized_integer(input: ParserInput) -> NomResult<f64> {
    map_opt(
        nom::combinator::recognize(pair(opt(one_of("+-")), digit1)),
        |digits: ParserInput| parse_ascii(digits.fragment()),
    )
    .parse(input)
}

fn real(input: ParserInput) -> NomResult<f64> {
    map_opt(
        nom::combinator::recognize(pair(
            opt(one_of("+-")),
            alt((
                map((digit1, tag(&b"."[..]), digit0), |_| ()),
                map(pair(tag(&b"."[..]), digit1), |_| ()),
            )),
        )),
        |digits: ParserInput| parse_ascii(digits.fragment()),
    )
    .parse(input)
}

pub(crate) fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_opt(
        verify(take(2usize), |h: &ParserInput| {
            h.as_bytes().iter().copied().all(AsChar::is_hex_digit)
        }),
        |x: ParserInput| str::from_utf8(&x).ok().and_then(|x| u8::from_str_radix(x, 16).ok()),
    )
    .parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_opt(take_while_m_n(1, 3, AsChar::is_oct_digit), |x: ParserInput| {
        // Overflow is ignored.
        str::from_utf8(&x)
            .ok()
            .and_then(|x| u16::from_str_radix(x, 8).ok())
            .map(|o| o as u8)
    })
    .parse(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                if c[0] != b'#' && is_regular(c[0]) {
                    Some(c[0])
                } else {
                    None
                }
            }),
        ))),
    )
    .parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    )
    .parse(input)
}

enum InnerLiteralString<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl InnerLiteralString<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            InnerLiteralString::Direct(s) | InnerLiteralString::Eol(s) => output.extend_from_slice(s),
            InnerLiteralString::Escape(e) => output.extend(e),
            InnerLiteralString::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), InnerLiteralString::Direct),
                map(escape_sequence, InnerLiteralString::Escape),
                map(eol, InnerLiteralString::Eol),
                map(nested_literal_string(depth), InnerLiteralString::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, value| {
                value.push(&mut out);
                out
            },
        )
        .parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            Err(failure(input, ErrorKind::TooLarge))
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            )
            .parse(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| (c[0] as char).to_digit(16).map(|d| d as u8)).parse(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |(mut out, odd), c| {
                        match out.last_mut() {
                            Some(last) if odd => *last |= c,
                            _ => out.push(c << 4),
                        }
                        (out, !odd)
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    )
    .parse(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(&b"true"[..]), |_| Object::Boolean(true)),
        map(tag(&b"false"[..]), |_| Object::Boolean(false)),
    ))
    .parse(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(&b"null"[..]), |_| Object::Null).parse(input)
}

fn array(input: ParserInput) -> NomResult<Vec<Object>> {
    delimited(pair(tag(&b"["[..]), space), many0(_direct_object), tag(&b"]"[..])).parse(input)
}

pub(crate) fn dictionary(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"<<"[..]), space), inner_dictionary, tag(&b">>"[..])).parse(input)
}

fn inner_dictionary(input: ParserInput) -> NomResult<Dictionary> {
    fold_many0(
        pair(terminated(name, space), _direct_object),
        Dictionary::new,
        |mut dict, (key, value)| {
            dict.set(key, value);
            dict
        },
    )
    .parse(input)
}

/// A stream body. The content is not copied: the stream refers back to the source.
fn stream<'a>(input: ParserInput<'a>, loader: &Loader, already_seen: &mut HashSet<ObjectId>) -> NomResult<'a, Object> {
    let (i, dict) = terminated(dictionary, (space, tag(&b"stream"[..]), space0, eol)).parse(input)?;

    let length = dict.get(b"Length").and_then(|value| match value.as_reference() {
        Ok(id) => loader.resolve_length(id, already_seen),
        Err(_) => value.as_i64(),
    });
    let length = match length.map(usize::try_from) {
        Ok(Ok(length)) => length,
        _ => return Err(failure(i, ErrorKind::LengthValue)),
    };

    let start = i.location_offset();
    let (i, _) = terminated(take(length), pair(opt(eol), tag(&b"endstream"[..])))
        .parse(i)
        .map_err(|_: nom::Err<NomError>| failure(i, ErrorKind::LengthValue))?;
    Ok((i, Object::Stream(Stream::lazy(dict, loader.lazy_content(start, length)))))
}

fn unsigned_int<I: FromStr>(input: ParserInput) -> NomResult<I> {
    map_opt(digit1, |digits: ParserInput| parse_ascii(digits.fragment())).parse(input)
}

fn object_id(input: ParserInput) -> NomResult<ObjectId> {
    pair(terminated(unsigned_int, space), terminated(unsigned_int, space)).parse(input)
}

fn reference(input: ParserInput) -> NomResult<Object> {
    map(terminated(object_id, tag(&b"R"[..])), Object::Reference).parse(input)
}

fn _direct_objects(input: ParserInput) -> NomResult<Object> {
    alt((
        null,
        boolean,
        reference,
        map(real, Object::Real),
        map(integer, Object::Integer),
        map(oversized_integer, Object::Real),
        map(name, Object::Name),
        map(literal_string, Object::string_literal),
        hexadecimal_string,
        map(array, Object::Array),
        map(dictionary, Object::Dictionary),
    ))
    .parse(input)
}

fn _direct_object(input: ParserInput) -> NomResult<Object> {
    terminated(_direct_objects, space).parse(input)
}

/// Parses an object that cannot be a stream, such as an entry of an object stream.
pub fn direct_object(input: ParserInput) -> Option<Object> {
    strip_nom(preceded(space, _direct_object).parse(input))
}

fn object<'a>(input: ParserInput<'a>, loader: &Loader, already_seen: &mut HashSet<ObjectId>) -> NomResult<'a, Object> {
    terminated(
        alt((|input| stream(input, loader, already_seen), _direct_objects)),
        space,
    )
    .parse(input)
}

/// Parses `N G obj ... endobj` starting at `offset` of `input`.
pub fn indirect_object(
    input: ParserInput, offset: usize, expected_id: Option<ObjectId>, loader: &Loader,
    already_seen: &mut HashSet<ObjectId>,
) -> Result<(ObjectId, Object)> {
    if offset > input.len() {
        return Err(Error::InvalidOffset(offset));
    }
    _indirect_object(input.take_from(offset), offset, expected_id, loader, already_seen)
}

fn _indirect_object<'a>(
    input: ParserInput<'a>, offset: usize, expected_id: Option<ObjectId>, loader: &Loader,
    already_seen: &mut HashSet<ObjectId>,
) -> Result<(ObjectId, Object)> {
    let (i, (_, object_id)) = terminated((space, object_id), pair(tag(&b"obj"[..]), space))
        .parse(input)
        .map_err(|_| ParseError::IndirectObject { offset })?;
    if let Some(expected_id) = expected_id {
        if object_id != expected_id {
            return Err(Error::ObjectIdMismatch);
        }
    }

    let (_, object) = terminated(
        |i: ParserInput<'a>| object(i, loader, already_seen),
        (space, opt(tag(&b"endobj"[..])), space),
    )
    .parse(i)
    .map_err(|_| ParseError::IndirectObject { offset })?;

    Ok((object_id, object))
}

pub fn header(input: ParserInput) -> Option<String> {
    strip_nom(
        map_res(
            delimited(
                tag(&b"%PDF-"[..]),
                take_while(|c: u8| !b"\r\n".contains(&c)),
                pair(eol, many0_count(comment)),
            ),
            |v: ParserInput| str::from_utf8(&v).map(|v| v.trim().to_string()),
        )
        .parse(input),
    )
}

/// Decode CrossReferenceTable
fn xref(input: ParserInput) -> NomResult<Xref> {
    let xref_eol = map(alt((tag(&b" \r"[..]), tag(&b" \n"[..]), tag(&b"\r\n"[..]))), |_| ());
    let xref_entry = pair(
        separated_pair(unsigned_int::<u64>, tag(&b" "[..]), unsigned_int::<u32>),
        delimited(tag(&b" "[..]), map(one_of("nf"), |k| k == 'n'), xref_eol),
    );

    let xref_section = pair(
        separated_pair(unsigned_int::<u32>, tag(&b" "[..]), unsigned_int::<u32>),
        preceded(pair(opt(tag(&b" "[..])), eol), many0(xref_entry)),
    );

    delimited(
        pair(tag(&b"xref"[..]), eol),
        fold_many1(
            xref_section,
            || Xref::new(0),
            |mut xref, ((start, _count), entries)| {
                for (index, ((offset, generation), is_normal)) in entries.into_iter().enumerate() {
                    if is_normal {
                        if let Ok(generation) = u16::try_from(generation) {
                            xref.insert(start + index as u32, XrefEntry::Normal { offset, generation });
                        }
                    }
                }
                xref
            },
        ),
        space,
    )
    .parse(input)
}

fn trailer(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"trailer"[..]), space), dictionary, space).parse(input)
}

/// Parses the cross-reference section at `input`: a classic table with its trailer,
/// or a cross-reference stream.
pub fn xref_and_trailer(input: ParserInput, loader: &Loader) -> Result<(Xref, Dictionary)> {
    if let Ok((_, (mut xref, trailer))) = pair(xref, trailer).parse(input) {
        xref.size = trailer
            .get(b"Size")
            .and_then(Object::as_i64)
            .ok()
            .and_then(|size| u32::try_from(size).ok())
            .ok_or(ParseError::InvalidTrailer)?;
        return Ok((xref, trailer));
    }

    let offset = input.location_offset();
    match _indirect_object(input, offset, None, loader, &mut HashSet::new()) {
        Ok((_, Object::Stream(stream))) if stream.dict.type_is(b"XRef") => decode_xref_stream(stream),
        Ok(_) => Err(ParseError::InvalidXref.into()),
        Err(_) => Err(XrefError::Parse.into()),
    }
}

fn integer_array(dict: &Dictionary, key: &[u8]) -> Result<Vec<i64>> {
    dict.get(key)?.as_array()?.iter().map(Object::as_i64).collect()
}

fn read_field(data: &[u8], position: &mut usize, width: usize) -> Result<u64> {
    let bytes = data
        .get(*position..*position + width)
        .ok_or(ParseError::InvalidXref)?;
    *position += width;
    Ok(bytes.iter().fold(0u64, |acc, &byte| acc << 8 | u64::from(byte)))
}

/// Reads the rows of a cross-reference stream. The returned dictionary serves as trailer.
pub fn decode_xref_stream(stream: Stream) -> Result<(Xref, Dictionary)> {
    let data = stream.decoded_content()?;
    let mut dict = stream.dict;

    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .ok()
        .and_then(|size| u32::try_from(size).ok())
        .ok_or(ParseError::InvalidXref)?;
    let index = integer_array(&dict, b"Index").unwrap_or_else(|_| vec![0, i64::from(size)]);
    let widths = integer_array(&dict, b"W").map_err(|_| ParseError::InvalidXref)?;
    if widths.len() < 3 || widths.iter().any(|&width| !(0..=8).contains(&width)) {
        return Err(ParseError::InvalidXref.into());
    }
    let widths = [widths[0] as usize, widths[1] as usize, widths[2] as usize];

    let mut xref = Xref::new(size);
    let mut position = 0;
    for section in index.chunks_exact(2) {
        let (start, count) = (section[0], section[1]);
        if start < 0 || count < 0 {
            return Err(ParseError::InvalidXref.into());
        }
        for number in start..start + count {
            let kind = if widths[0] == 0 {
                1
            } else {
                read_field(&data, &mut position, widths[0])?
            };
            let second = read_field(&data, &mut position, widths[1])?;
            let third = read_field(&data, &mut position, widths[2])?;
            let number = u32::try_from(number).map_err(|_| ParseError::InvalidXref)?;
            match kind {
                1 => xref.insert(
                    number,
                    XrefEntry::Normal {
                        offset: second,
                        generation: third as u16,
                    },
                ),
                2 => xref.insert(
                    number,
                    XrefEntry::Compressed {
                        container: second as u32,
                        index: third as u16,
                    },
                ),
                _ => {}
            }
        }
    }

    let stream_keys: [&[u8]; 6] = [b"Length", b"Filter", b"DecodeParms", b"W", b"Index", b"Type"];
    for key in stream_keys {
        dict.remove(key);
    }
    Ok((xref, dict))
}

pub fn xref_start(input: ParserInput) -> Option<i64> {
    strip_nom(
        delimited(
            pair(tag(&b"startxref"[..]), eol),
            trim_spaces(integer),
            (eol, tag(&b"%%EOF"[..]), space),
        )
        .parse(input),
    )
}

fn trim_spaces<'a, O>(
    p: impl Parser<ParserInput<'a>, Output = O, Error = NomError<'a>>,
) -> impl Parser<ParserInput<'a>, Output = O, Error = NomError<'a>> {
    delimited(many0(tag(&b" "[..])), p, many0(tag(&b" "[..])))
}
