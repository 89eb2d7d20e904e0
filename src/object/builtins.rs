//! The fixed registry of native functions.
//!
//! Both backends index this table: the compiler binds each name to its position
//! and `OP_GET_BUILTIN` looks the same position up again, so entries must never be
//! reordered without recompiling.

use std::io::Write;

use super::Object;

pub type BuiltinFunction = fn(&mut dyn Write, &[Object]) -> std::io::Result<Object>;

#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub function: BuiltinFunction,
}

pub static BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "len",
        function: len,
    },
    Builtin {
        name: "puts",
        function: puts,
    },
    Builtin {
        name: "first",
        function: first,
    },
    Builtin {
        name: "last",
        function: last,
    },
    Builtin {
        name: "rest",
        function: rest,
    },
    Builtin {
        name: "push",
        function: push,
    },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn wrong_argument_count(got: usize, want: usize) -> Object {
    Object::error(format!(
        "wrong number of arguments. got={got}, want={want}"
    ))
}

fn array_argument<'a>(name: &str, args: &'a [Object]) -> Result<&'a [Object], Object> {
    match &args[0] {
        Object::Array(elements) => Ok(elements.as_slice()),
        other => Err(Object::error(format!(
            "argument to '{name}' must be ARRAY, got {}",
            other.type_name()
        ))),
    }
}

fn len(_: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    if args.len() != 1 {
        return Ok(wrong_argument_count(args.len(), 1));
    }
    Ok(match &args[0] {
        Object::String(s) => Object::Integer(s.len() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => Object::error(format!(
            "argument to 'len' not supported, got {}",
            other.type_name()
        )),
    })
}

fn puts(out: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    for arg in args {
        writeln!(out, "{}", arg)?;
    }
    Ok(Object::Null)
}

fn first(_: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    if args.len() != 1 {
        return Ok(wrong_argument_count(args.len(), 1));
    }
    Ok(match array_argument("first", args) {
        Ok(elements) => elements.first().cloned().unwrap_or(Object::Null),
        Err(error) => error,
    })
}

fn last(_: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    if args.len() != 1 {
        return Ok(wrong_argument_count(args.len(), 1));
    }
    Ok(match array_argument("last", args) {
        Ok(elements) => elements.last().cloned().unwrap_or(Object::Null),
        Err(error) => error,
    })
}

fn rest(_: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    if args.len() != 1 {
        return Ok(wrong_argument_count(args.len(), 1));
    }
    Ok(match array_argument("rest", args) {
        Ok([]) => Object::Null,
        Ok([_, tail @ ..]) => Object::array(tail.to_vec()),
        Err(error) => error,
    })
}

fn push(_: &mut dyn Write, args: &[Object]) -> std::io::Result<Object> {
    if args.len() != 2 {
        return Ok(wrong_argument_count(args.len(), 2));
    }
    Ok(match array_argument("push", args) {
        Ok(elements) => {
            let mut elements = elements.to_vec();
            elements.push(args[1].clone());
            Object::array(elements)
        }
        Err(error) => error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Object]) -> Object {
        let builtin = lookup(name).unwrap();
        (builtin.function)(&mut std::io::sink(), args).unwrap()
    }

    fn ints(values: &[i64]) -> Object {
        Object::array(values.iter().copied().map(Object::Integer).collect())
    }

    #[test]
    fn test_registry_order() {
        let names: Vec<_> = BUILTINS.iter().map(|builtin| builtin.name).collect();
        assert_eq!(names, ["len", "puts", "first", "last", "rest", "push"]);
    }

    #[test]
    fn test_len() {
        assert!(matches!(call("len", &["four".into()]), Object::Integer(4)));
        assert!(matches!(call("len", &[ints(&[1, 2, 3])]), Object::Integer(3)));
        assert_eq!(
            call("len", &[Object::Integer(1)]).to_string(),
            "ERROR: argument to 'len' not supported, got INTEGER"
        );
        assert_eq!(
            call("len", &["one".into(), "two".into()]).to_string(),
            "ERROR: wrong number of arguments. got=2, want=1"
        );
    }

    #[test]
    fn test_array_builtins() {
        assert!(matches!(call("first", &[ints(&[1, 2, 3])]), Object::Integer(1)));
        assert!(matches!(call("last", &[ints(&[1, 2, 3])]), Object::Integer(3)));
        assert!(matches!(call("first", &[ints(&[])]), Object::Null));
        assert_eq!(call("rest", &[ints(&[1, 2, 3])]).to_string(), "[2, 3]");
        assert!(matches!(call("rest", &[ints(&[])]), Object::Null));
        assert_eq!(call("push", &[ints(&[]), Object::Integer(1)]).to_string(), "[1]");
        assert_eq!(
            call("first", &[Object::Integer(1)]).to_string(),
            "ERROR: argument to 'first' must be ARRAY, got INTEGER"
        );
    }

    #[test]
    fn test_puts_writes_each_argument() {
        let mut out = Vec::new();
        let puts = lookup("puts").unwrap().function;
        let result = puts(&mut out, &["hello".into(), Object::Integer(7)]).unwrap();
        assert!(matches!(result, Object::Null));
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n7\n");
    }
}
