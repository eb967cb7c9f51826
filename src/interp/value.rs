//! Runtime values for the command language.
//!
//! A value is a tagged sum over the type set; strings are lists of chars.
//! Values carry enough type information to reconstruct their descriptor,
//! which is what cast-distance lookups operate on. Function values hold the
//! command's name and signature rather than a pointer, so they can be
//! persisted and resolved again at call time.

use crate::codec::{tags, Persist, Reader, Writer};
use crate::error::{CodecError, CodecResult};
use crate::interp::types::Type;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Dbl(f64),
    Char(char),
    /// element type (needed when the list is empty), elements
    List(Arc<Type>, Vec<Value>),
    /// key type, value type, entries
    Map(Arc<Type>, Arc<Type>, BTreeMap<Value, Value>),
    /// command name, signature
    Func(String, Arc<Type>),
}

impl Value {
    pub fn of_string(s: &str) -> Value {
        Value::List(Type::character(), s.chars().map(Value::Char).collect())
    }

    /// A zero value of the given type, used when indexing inserts into maps.
    pub fn default_of(ty: &Arc<Type>) -> Value {
        match ty.as_ref() {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Char => Value::Char('\0'),
            Type::Int => Value::Int(0),
            Type::Dbl => Value::Dbl(0.0),
            Type::List(e) => Value::List(e.clone(), Vec::new()),
            Type::Map(k, v) => Value::Map(k.clone(), v.clone(), BTreeMap::new()),
            Type::Func(..) => Value::Void,
        }
    }

    pub fn ty(&self) -> Arc<Type> {
        match self {
            Value::Void => Type::void(),
            Value::Bool(_) => Type::boolean(),
            Value::Int(_) => Type::integer(),
            Value::Dbl(_) => Type::double(),
            Value::Char(_) => Type::character(),
            Value::List(e, _) => Type::list(e.clone()),
            Value::Map(k, v, _) => Type::map(k.clone(), v.clone()),
            Value::Func(_, sig) => sig.clone(),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::List(e, _) if e.is_char())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Implicit conversion along a nonnegative cast distance.
    pub fn cast_to(&self, to: &Arc<Type>) -> Option<Value> {
        if self.ty().is_same(to) {
            return Some(self.clone());
        }

        match (self, to.as_ref()) {
            (Value::Int(i), Type::Dbl) => Some(Value::Dbl(*i as f64)),
            (Value::List(e, xs), Type::List(te)) if te.is_void() => {
                Some(Value::List(e.clone(), xs.clone()))
            }
            (Value::Map(k, v, m), Type::Map(..)) if self.ty().cast_distance(to) >= 0 => {
                Some(Value::Map(k.clone(), v.clone(), m.clone()))
            }
            _ => None,
        }
    }

    /// Render for display back to chat: strings keep their quotes, chars
    /// their ticks.
    pub fn str(&self) -> String {
        match self {
            Value::Void => "()".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Dbl(d) => format!("{d:.3}"),
            Value::Char(c) => format!("'{c}'"),
            Value::List(e, xs) if e.is_char() => {
                let mut out = String::with_capacity(xs.len() + 2);
                out.push('"');
                for x in xs {
                    if let Value::Char(c) = x {
                        out.push(*c);
                    }
                }
                out.push('"');
                out
            }
            Value::List(_, xs) => {
                let inner: Vec<String> = xs.iter().map(|x| x.str()).collect();
                format!("[ {} ]", inner.join(", "))
            }
            Value::Map(_, _, m) => {
                let inner: Vec<String> =
                    m.iter().map(|(k, v)| format!("{}: {}", k.str(), v.str())).collect();
                format!("[ {} ]", inner.join(", "))
            }
            Value::Func(name, sig) => format!("{name}: {sig}"),
        }
    }

    /// Render without decoration, for interpolation into messages.
    pub fn raw_str(&self) -> String {
        match self {
            Value::Char(c) => c.to_string(),
            Value::List(e, xs) if e.is_char() => {
                xs.iter()
                    .filter_map(|x| match x {
                        Value::Char(c) => Some(*c),
                        _ => None,
                    })
                    .collect()
            }
            _ => self.str(),
        }
    }

    fn order_class(&self) -> u8 {
        match self {
            Value::Void => 0,
            Value::Int(_) => 1,
            Value::Dbl(_) => 2,
            Value::Bool(_) => 3,
            Value::List(..) => 4,
            Value::Map(..) => 5,
            Value::Char(_) => 6,
            Value::Func(..) => 7,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.str())
    }
}

// total order so values can key ordered maps; doubles use the IEEE total
// ordering, mismatched kinds fall back to their class index.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Void, Value::Void) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Dbl(a), Value::Dbl(b)) => a.total_cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::List(_, a), Value::List(_, b)) => a.cmp(b),
            (Value::Map(_, _, a), Value::Map(_, _, b)) => a.cmp(b),
            (Value::Func(a, _), Value::Func(b, _)) => a.cmp(b),
            _ => self.order_class().cmp(&other.order_class()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Persist for Value {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::INTERP_VALUE);
        w.write(&self.ty());

        match self {
            Value::Void => {}
            Value::Bool(b) => w.write(b),
            Value::Int(i) => w.write(i),
            Value::Dbl(d) => w.write(d),
            Value::Char(c) => w.write(&(*c as u32)),
            Value::List(_, xs) => w.write(xs),
            Value::Map(_, _, m) => w.write(m),
            Value::Func(name, _) => w.write_str(name),
        }
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::INTERP_VALUE)?;
        let ty: Arc<Type> = r.read()?;

        match ty.as_ref() {
            Type::Void => Ok(Value::Void),
            Type::Bool => Ok(Value::Bool(r.read()?)),
            Type::Int => Ok(Value::Int(r.read()?)),
            Type::Dbl => Ok(Value::Dbl(r.read()?)),
            Type::Char => {
                let c: u32 = r.read()?;
                char::from_u32(c)
                    .map(Value::Char)
                    .ok_or_else(|| CodecError::Invalid(format!("invalid codepoint {c:#x}")))
            }
            Type::List(e) => Ok(Value::List(e.clone(), r.read()?)),
            Type::Map(k, v) => Ok(Value::Map(k.clone(), v.clone(), r.read()?)),
            Type::Func(..) => Ok(Value::Func(r.read_str()?, ty.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_representation() {
        let v = Value::of_string("hi");
        assert!(v.is_string());
        assert_eq!(v.str(), "\"hi\"");
        assert_eq!(v.raw_str(), "hi");
        assert_eq!(Value::Int(18).raw_str(), "18");
        assert_eq!(Value::Dbl(1.5).str(), "1.500");
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::of_string("abc"), Value::of_string("abc"));
        assert_ne!(Value::of_string("abc"), Value::of_string("abd"));
        assert_ne!(Value::Int(1), Value::Dbl(1.0));
    }

    #[test]
    fn test_map_keys_order() {
        let mut m = BTreeMap::new();
        m.insert(Value::of_string("b"), Value::Int(2));
        m.insert(Value::of_string("a"), Value::Int(1));
        let v = Value::Map(Type::string(), Type::integer(), m);
        assert_eq!(v.str(), "[ \"a\": 1, \"b\": 2 ]");
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            Value::Int(3).cast_to(&Type::double()),
            Some(Value::Dbl(3.0))
        );
        assert!(Value::Dbl(3.0).cast_to(&Type::integer()).is_none());
        assert!(Value::of_string("x")
            .cast_to(&Type::list(Type::void()))
            .is_some());
    }

    #[test]
    fn test_value_roundtrip() {
        let cases = vec![
            Value::Void,
            Value::Bool(true),
            Value::Int(-7),
            Value::Dbl(2.25),
            Value::Char('é'),
            Value::of_string("round trip"),
            Value::List(Type::integer(), vec![Value::Int(1), Value::Int(2)]),
            Value::Map(
                Type::string(),
                Type::integer(),
                [(Value::of_string("k"), Value::Int(9))].into_iter().collect(),
            ),
            Value::Func("greet".to_string(), Type::macro_function()),
        ];

        for v in cases {
            let mut w = Writer::new();
            w.write(&v);
            let bytes = w.into_bytes();

            let mut r = Reader::new(&bytes);
            let back: Value = r.read().unwrap();
            assert_eq!(back, v);
            assert_eq!(r.remaining(), 0);
        }
    }
}
