//! Type descriptors for the command language.
//!
//! Types are immutable, reference-counted, and structurally compared. Leaf
//! types are cached singletons so the common cases never allocate.

use crate::codec::{Persist, Reader, Writer};
use crate::error::{CodecError, CodecResult};
use std::fmt;
use std::sync::{Arc, OnceLock};

const T_VOID: u8 = 0;
const T_INT: u8 = 1;
const T_DBL: u8 = 2;
const T_BOOL: u8 = 3;
const T_LIST: u8 = 4;
const T_MAP: u8 = 5;
const T_CHAR: u8 = 6;
const T_FUNC: u8 = 7;

/// A type in the command language. `str` is `[char]`.
#[derive(Debug, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    Char,
    Int,
    Dbl,
    List(Arc<Type>),
    /// key type, value type
    Map(Arc<Type>, Arc<Type>),
    /// return type, argument types
    Func(Arc<Type>, Vec<Arc<Type>>),
}

static TY_VOID: OnceLock<Arc<Type>> = OnceLock::new();
static TY_BOOL: OnceLock<Arc<Type>> = OnceLock::new();
static TY_CHAR: OnceLock<Arc<Type>> = OnceLock::new();
static TY_INT: OnceLock<Arc<Type>> = OnceLock::new();
static TY_DBL: OnceLock<Arc<Type>> = OnceLock::new();
static TY_STR: OnceLock<Arc<Type>> = OnceLock::new();

impl Type {
    pub fn void() -> Arc<Type> {
        TY_VOID.get_or_init(|| Arc::new(Type::Void)).clone()
    }

    pub fn boolean() -> Arc<Type> {
        TY_BOOL.get_or_init(|| Arc::new(Type::Bool)).clone()
    }

    pub fn character() -> Arc<Type> {
        TY_CHAR.get_or_init(|| Arc::new(Type::Char)).clone()
    }

    pub fn integer() -> Arc<Type> {
        TY_INT.get_or_init(|| Arc::new(Type::Int)).clone()
    }

    pub fn double() -> Arc<Type> {
        TY_DBL.get_or_init(|| Arc::new(Type::Dbl)).clone()
    }

    pub fn string() -> Arc<Type> {
        TY_STR
            .get_or_init(|| Arc::new(Type::List(Type::character())))
            .clone()
    }

    pub fn list(elem: Arc<Type>) -> Arc<Type> {
        Arc::new(Type::List(elem))
    }

    pub fn map(key: Arc<Type>, value: Arc<Type>) -> Arc<Type> {
        Arc::new(Type::Map(key, value))
    }

    pub fn function(ret: Arc<Type>, args: Vec<Arc<Type>>) -> Arc<Type> {
        Arc::new(Type::Func(ret, args))
    }

    /// Macros take a list of strings and produce a list of strings.
    pub fn macro_function() -> Arc<Type> {
        Type::function(Type::list(Type::string()), vec![Type::list(Type::string())])
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Bool)
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Type::Char)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int)
    }

    pub fn is_dbl(&self) -> bool {
        matches!(self, Type::Dbl)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Type::List(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(..))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Type::Func(..))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::List(e) if e.is_char())
    }

    pub fn elem_type(&self) -> Option<&Arc<Type>> {
        match self {
            Type::List(e) => Some(e),
            Type::Map(_, v) => Some(v),
            _ => None,
        }
    }

    pub fn key_type(&self) -> Option<&Arc<Type>> {
        match self {
            Type::Map(k, _) => Some(k),
            _ => None,
        }
    }

    pub fn ret_type(&self) -> Option<&Arc<Type>> {
        match self {
            Type::Func(r, _) => Some(r),
            _ => None,
        }
    }

    pub fn arg_types(&self) -> &[Arc<Type>] {
        match self {
            Type::Func(_, a) => a,
            _ => &[],
        }
    }

    /// Structural equality.
    pub fn is_same(&self, other: &Type) -> bool {
        self == other
    }

    /// How far an implicit conversion from `self` to `to` is; -1 means no
    /// conversion exists. `[void]` and `[void: void]` act as generic
    /// placeholders: concrete containers cast *into* them, never out.
    pub fn cast_distance(&self, to: &Type) -> i32 {
        if self.is_same(to) {
            return 0;
        }

        match (self, to) {
            (Type::Int, Type::Dbl) => 1,
            (Type::List(_), Type::List(te)) if te.is_void() => 2,
            (Type::Map(sk, sv), Type::Map(tk, tv)) => {
                if sk.is_same(tk) && tv.is_void() {
                    2
                } else if sv.is_same(tv) && tk.is_void() {
                    2
                } else if tk.is_void() && tv.is_void() {
                    3
                } else {
                    -1
                }
            }
            _ => -1,
        }
    }

    fn type_id(&self) -> u8 {
        match self {
            Type::Void => T_VOID,
            Type::Int => T_INT,
            Type::Dbl => T_DBL,
            Type::Bool => T_BOOL,
            Type::List(_) => T_LIST,
            Type::Map(..) => T_MAP,
            Type::Char => T_CHAR,
            Type::Func(..) => T_FUNC,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::Int => write!(f, "int"),
            Type::Dbl => write!(f, "dbl"),
            Type::List(e) if e.is_char() => write!(f, "str"),
            Type::List(e) => write!(f, "[{e}]"),
            Type::Map(k, v) => write!(f, "[{k}: {v}]"),
            Type::Func(r, args) => {
                write!(f, "fn(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ") -> {r}")
            }
        }
    }
}

// types are written structurally: a bare id byte, then children. leaf reads
// resolve to the cached singletons so pointer identity is preserved cheaply.
impl Persist for Arc<Type> {
    fn write_to(&self, w: &mut Writer) {
        w.raw(&[self.type_id()]);
        match self.as_ref() {
            Type::List(e) => w.write(e),
            Type::Map(k, v) => {
                w.write(k);
                w.write(v);
            }
            Type::Func(r, args) => {
                w.write(r);
                w.write(&(args.len() as u64));
                for a in args {
                    w.write(a);
                }
            }
            _ => {}
        }
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        let id = r.raw_u8()?;
        match id {
            T_VOID => Ok(Type::void()),
            T_INT => Ok(Type::integer()),
            T_DBL => Ok(Type::double()),
            T_BOOL => Ok(Type::boolean()),
            T_CHAR => Ok(Type::character()),
            T_LIST => Ok(Type::list(r.read()?)),
            T_MAP => {
                let k = r.read()?;
                let v = r.read()?;
                Ok(Type::map(k, v))
            }
            T_FUNC => {
                let ret = r.read()?;
                let count: u64 = r.read()?;
                let mut args = Vec::with_capacity(count.min(0xFF) as usize);
                for _ in 0..count {
                    args.push(r.read()?);
                }
                Ok(Type::function(ret, args))
            }
            _ => Err(CodecError::Invalid(format!("invalid type id {id:#04x}"))),
        }
    }
}
