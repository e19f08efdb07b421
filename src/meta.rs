use std::collections::HashMap;

/// Description of one callable method on a service.
///
/// The full signature is the parenthesized argument tuple followed by the
/// return type, e.g. `"(ii)i"` for a method taking two ints and returning
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaMethod {
    id: u32,
    name: String,
    signature: String,
}

impl MetaMethod {
    pub fn new(id: u32, name: impl Into<String>, signature: impl Into<String>) -> MetaMethod {
        MetaMethod {
            id,
            name: name.into(),
            signature: signature.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full `(args)ret` signature.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The argument signature with the outer tuple parentheses stripped:
    /// `"(ii)i"` yields `"ii"`. This is the signature a call payload built
    /// from the raw arguments carries.
    pub fn parameters_signature(&self) -> &str {
        match split_tuple(&self.signature) {
            Some((inner, _)) => inner,
            None => "",
        }
    }

    /// The return signature: whatever follows the leading argument tuple.
    pub fn return_signature(&self) -> &str {
        match split_tuple(&self.signature) {
            Some((_, rest)) => rest,
            None => &self.signature,
        }
    }
}

/// Splits `"(inner)rest"` into `(inner, rest)`, honoring nested tuples.
fn split_tuple(signature: &str) -> Option<(&str, &str)> {
    if !signature.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    for (i, c) in signature.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&signature[1..i], &signature[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Description of one signal a service can emit. The signature is the
/// parenthesized argument tuple, e.g. `"(i)"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSignal {
    id: u32,
    name: String,
    signature: String,
}

impl MetaSignal {
    pub fn new(id: u32, name: impl Into<String>, signature: impl Into<String>) -> MetaSignal {
        MetaSignal {
            id,
            name: name.into(),
            signature: signature.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The argument signature with the outer tuple parentheses stripped.
    pub fn parameters_signature(&self) -> &str {
        match split_tuple(&self.signature) {
            Some((inner, _)) => inner,
            None => &self.signature,
        }
    }
}

/// Method and signal tables describing a remote service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaObject {
    methods: HashMap<u32, MetaMethod>,
    signals: HashMap<u32, MetaSignal>,
}

impl MetaObject {
    pub fn builder() -> MetaObjectBuilder {
        MetaObjectBuilder::default()
    }

    pub fn method(&self, id: u32) -> Option<&MetaMethod> {
        self.methods.get(&id)
    }

    pub fn signal(&self, id: u32) -> Option<&MetaSignal> {
        self.signals.get(&id)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MetaMethod> {
        self.methods.values()
    }

    pub fn signals(&self) -> impl Iterator<Item = &MetaSignal> {
        self.signals.values()
    }
}

#[derive(Debug, Default)]
pub struct MetaObjectBuilder {
    methods: HashMap<u32, MetaMethod>,
    signals: HashMap<u32, MetaSignal>,
}

impl MetaObjectBuilder {
    pub fn method(
        mut self,
        id: u32,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> MetaObjectBuilder {
        self.methods.insert(id, MetaMethod::new(id, name, signature));
        self
    }

    pub fn signal(
        mut self,
        id: u32,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> MetaObjectBuilder {
        self.signals.insert(id, MetaSignal::new(id, name, signature));
        self
    }

    pub fn build(self) -> MetaObject {
        MetaObject {
            methods: self.methods,
            signals: self.signals,
        }
    }
}
