//! String rendering: interpolation and `str()`

use super::arg_count;
use crate::executor::calls::{call_sync, require};
use crate::executor::guard::Capability;
use crate::executor::types::{Control, Val};
use crate::executor::vm::{Ctx, VM};

/// Method an object may carry to customize how it renders
pub const TO_STRING: &str = "toString";

/// Concatenate evaluated interpolation parts
///
/// A part that evaluated to a closure is lazy: it is called with no
/// arguments and its result is rendered in its place.
pub fn interpolate(vm: &mut VM, cx: Ctx<'_>, parts: Vec<Val>) {
    let mut out = String::new();
    for part in parts {
        let rendered = match part {
            Val::Closure(lazy) => {
                require(vm, Capability::Interpolation);
                call_sync(vm, cx, "interpolation", lazy, vec![])
                    .and_then(|v| render(vm, cx, v))
            }
            other => render(vm, cx, other),
        };
        match rendered {
            Ok(s) => out.push_str(&s),
            Err(error) => {
                vm.control = Control::Throw(error);
                return;
            }
        }
    }
    vm.set_acc(Val::Str(out));
}

/// str(value) - render a value to a string
pub fn str(vm: &mut VM, cx: Ctx<'_>, args: Vec<Val>) -> Result<Val, Val> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(v), None) => render(vm, cx, v).map(Val::Str),
        _ => Err(arg_count("str", 1, got)),
    }
}

/// Render one value, coercing objects that implement `toString` through it
fn render(vm: &mut VM, cx: Ctx<'_>, value: Val) -> Result<String, Val> {
    let Val::Obj(map) = &value else {
        return Ok(value.to_string());
    };
    let Some(Val::Closure(method)) = map.get(TO_STRING).cloned() else {
        return Ok(value.to_string());
    };

    require(vm, Capability::Interface(TO_STRING.to_string()));
    let result = call_sync(vm, cx, TO_STRING, method, vec![])?;
    Ok(result.to_string())
}
