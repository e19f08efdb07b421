use serde::{Deserialize, Serialize};
use std::{iter::Peekable, str::Chars};
use thiserror::Error;

/// Wire type described by one signature term.
///
/// The signature grammar is one character per scalar — `v` void, `i` int64,
/// `I` uint32, `s` string — and `(...)` for tuples. A buffer holding an
/// int and a string has the signature `is`; a tuple of those, `(is)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Int,
    UInt,
    Str,
    Tuple(Vec<Type>),
}

impl Type {
    /// Parses a signature describing exactly one type.
    pub fn from_signature(sig: &str) -> Result<Type, SignatureError> {
        let mut terms = sig.chars().peekable();
        let ty = Self::parse_term(&mut terms, sig)?;
        if terms.next().is_some() {
            return Err(SignatureError::Trailing(sig.to_owned()));
        }
        Ok(ty)
    }

    /// Parses a signature describing a sequence of types, such as the
    /// argument pack of a method. The empty signature is the empty pack.
    pub fn tuple_from_signature(sig: &str) -> Result<Vec<Type>, SignatureError> {
        let mut terms = sig.chars().peekable();
        let mut types = Vec::new();
        while terms.peek().is_some() {
            types.push(Self::parse_term(&mut terms, sig)?);
        }
        Ok(types)
    }

    fn parse_term(terms: &mut Peekable<Chars>, sig: &str) -> Result<Type, SignatureError> {
        match terms.next() {
            Some('v') => Ok(Type::Void),
            Some('i') => Ok(Type::Int),
            Some('I') => Ok(Type::UInt),
            Some('s') => Ok(Type::Str),
            Some('(') => {
                let mut elements = Vec::new();
                loop {
                    match terms.peek() {
                        Some(')') => {
                            terms.next();
                            return Ok(Type::Tuple(elements));
                        }
                        Some(_) => elements.push(Self::parse_term(terms, sig)?),
                        None => return Err(SignatureError::UnclosedTuple(sig.to_owned())),
                    }
                }
            }
            Some(other) => Err(SignatureError::UnknownTerm(other, sig.to_owned())),
            None => Err(SignatureError::Empty),
        }
    }

    /// The signature string this type parses from.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        self.write_signature(&mut out);
        out
    }

    fn write_signature(&self, out: &mut String) {
        match self {
            Type::Void => out.push('v'),
            Type::Int => out.push('i'),
            Type::UInt => out.push('I'),
            Type::Str => out.push('s'),
            Type::Tuple(elements) => {
                out.push('(');
                for element in elements {
                    element.write_signature(out);
                }
                out.push(')');
            }
        }
    }

    /// Deserializes one value of this type from the reader.
    pub fn read(&self, reader: &mut Reader) -> Result<Value, DecodeError> {
        Ok(match self {
            Type::Void => Value::Void,
            Type::Int => Value::Int(reader.read_i64()?),
            Type::UInt => Value::UInt(reader.read_u32()?),
            Type::Str => Value::Str(reader.read_string()?),
            Type::Tuple(elements) => Value::Tuple(
                elements
                    .iter()
                    .map(|element| element.read(reader))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignatureError {
    #[error("empty signature")]
    Empty,

    #[error("unknown signature term '{0}' in \"{1}\"")]
    UnknownTerm(char, String),

    #[error("unclosed tuple in \"{0}\"")]
    UnclosedTuple(String),

    #[error("trailing terms in \"{0}\"")]
    Trailing(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("payload truncated: wanted {wanted} more bytes, {left} left")]
    Truncated { wanted: usize, left: usize },

    #[error("payload string is not valid UTF-8")]
    Utf8,
}

/// A deserialized wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Int(i64),
    UInt(u32),
    Str(String),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Void => Type::Void,
            Value::Int(_) => Type::Int,
            Value::UInt(_) => Type::UInt,
            Value::Str(_) => Type::Str,
            Value::Tuple(elements) => Type::Tuple(elements.iter().map(Value::type_of).collect()),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Value::Void => {}
            Value::Int(n) => out.extend_from_slice(&n.to_le_bytes()),
            Value::UInt(n) => out.extend_from_slice(&n.to_le_bytes()),
            Value::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Tuple(elements) => {
                for element in elements {
                    element.write(out);
                }
            }
        }
    }
}

macro_rules! impl_from {
    ($rust_type:ty, $name:pat => $expr:expr) => {
        impl From<$rust_type> for Value {
            fn from($name: $rust_type) -> Value {
                $expr
            }
        }
    };
}

impl_from!((), _unit => Value::Void);
impl_from!(i64, n => Value::Int(n));
impl_from!(u32, n => Value::UInt(n));
impl_from!(String, s => Value::Str(s));
impl_from!(&str, s => Value::Str(s.to_owned()));

/// Payload carried by a message: a signature string followed by the bytes of
/// the values it describes, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    signature: String,
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    pub fn of(values: &[Value]) -> Buffer {
        let mut buffer = Buffer::new();
        for value in values {
            buffer.push(value);
        }
        buffer
    }

    /// Appends one value, extending the buffer signature accordingly.
    pub fn push(&mut self, value: &Value) {
        value.type_of().write_signature(&mut self.signature);
        value.write(&mut self.data);
    }

    /// The serialized signature of everything written so far.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_empty() && self.data.is_empty()
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader {
            data: &self.data,
            pos: 0,
        }
    }
}

/// Cursor over a buffer's value bytes.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, wanted: usize) -> Result<&'a [u8], DecodeError> {
        let left = self.data.len() - self.pos;
        if left < wanted {
            return Err(DecodeError::Truncated { wanted, left });
        }
        let bytes = &self.data[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Utf8)
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
