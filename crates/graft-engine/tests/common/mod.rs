//! Minimal evaluator for patched method bodies
//!
//! Just enough semantics to construct objects, run initializers and read
//! fields back, so tests can observe what the injected code does at runtime.

#![allow(dead_code)]

use graft_engine::bytecode::{
    FieldRef, Instruction, MethodBuilder, MethodRef, TypeSig, CONSTRUCTOR_NAME,
};
use graft_engine::index::{MethodHandle, ModuleIndex, TypeHandle};
use std::collections::HashMap;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Obj(usize),
    Type(TypeSig),
    Addr(usize, String),
}

impl Value {
    fn truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::I32(0) | Value::I64(0))
    }

    pub fn obj(&self) -> Option<usize> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }
}

/// Heap object
#[derive(Debug, Clone)]
pub struct Object {
    pub ty: TypeHandle,
    pub fields: HashMap<String, Value>,
}

/// Host implementation of a method: `(index, heap, target, args) -> result`
pub type Native =
    Box<dyn Fn(&ModuleIndex, &mut Vec<Object>, &MethodRef, &[Value]) -> Result<Value, String>>;

pub struct Vm<'a> {
    index: &'a ModuleIndex,
    pub heap: Vec<Object>,
    natives: HashMap<String, Native>,
    depth: usize,
}

fn default_value(ty: &TypeSig) -> Value {
    match ty {
        TypeSig::Bool
        | TypeSig::Char
        | TypeSig::I8
        | TypeSig::U8
        | TypeSig::I16
        | TypeSig::U16
        | TypeSig::I32
        | TypeSig::U32 => Value::I32(0),
        TypeSig::I64 | TypeSig::U64 => Value::I64(0),
        TypeSig::F32 => Value::F32(0.0),
        TypeSig::F64 => Value::F64(0.0),
        _ => Value::Null,
    }
}

/// Narrow a stack value to the storage width of a field
fn coerce(ty: &TypeSig, value: Value) -> Value {
    match (ty, value) {
        (TypeSig::I8, Value::I32(v)) => Value::I32(v as i8 as i32),
        (TypeSig::U8, Value::I32(v)) => Value::I32(v as u8 as i32),
        (TypeSig::I16, Value::I32(v)) => Value::I32(v as i16 as i32),
        (TypeSig::U16 | TypeSig::Char, Value::I32(v)) => Value::I32(v as u16 as i32),
        (_, value) => value,
    }
}

/// Allocate an object with zeroed fields from its whole base chain
pub fn alloc(index: &ModuleIndex, heap: &mut Vec<Object>, ty: TypeHandle) -> usize {
    let sig = index.type_sig(ty);
    let mut fields = HashMap::new();
    for sig in std::iter::once(sig.clone()).chain(index.base_chain(&sig)) {
        if let Some(handle) = index.resolve_sig(&sig) {
            for field in index.type_def(handle).fields.iter().filter(|f| !f.is_static()) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| default_value(&field.ty));
            }
        }
    }
    heap.push(Object { ty, fields });
    heap.len() - 1
}

fn native_key(target: &MethodRef) -> String {
    let owner = target
        .owner
        .type_ref()
        .map(|r| r.name.clone())
        .unwrap_or_else(|| target.owner.to_string());
    format!("{}:{}", owner, target.name)
}

impl<'a> Vm<'a> {
    pub fn new(index: &'a ModuleIndex) -> Self {
        Self {
            index,
            heap: Vec::new(),
            natives: HashMap::new(),
            depth: 0,
        }
    }

    /// Bind a host implementation to `"Type:Method"`
    pub fn native<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&ModuleIndex, &mut Vec<Object>, &MethodRef, &[Value]) -> Result<Value, String>
            + 'static,
    {
        self.natives.insert(key.to_string(), Box::new(f));
        self
    }

    /// Allocate and run the instance constructor taking `args.len()` arguments
    pub fn construct(&mut self, type_name: &str, args: Vec<Value>) -> Result<usize, String> {
        let ty = self
            .index
            .find_type(type_name)
            .ok_or_else(|| format!("type {} not found", type_name))?;
        let ctor = self
            .index
            .type_def(ty)
            .methods
            .iter()
            .position(|m| m.is_constructor() && !m.is_static() && m.params.len() == args.len())
            .ok_or_else(|| format!("no constructor with {} arguments", args.len()))?;
        let obj = alloc(self.index, &mut self.heap, ty);
        let mut full = vec![Value::Obj(obj)];
        full.extend(args);
        self.invoke(MethodHandle { ty, index: ctor }, full)?;
        Ok(obj)
    }

    /// Call a method by `"Type:Method"` name
    pub fn call(&mut self, qualified: &str, args: Vec<Value>) -> Result<Value, String> {
        let handle = self
            .index
            .find_method(qualified)
            .ok_or_else(|| format!("method {} not found", qualified))?;
        self.invoke(handle, args)
    }

    pub fn field(&self, obj: usize, name: &str) -> Option<&Value> {
        self.heap.get(obj)?.fields.get(name)
    }

    pub fn type_name(&self, obj: usize) -> &str {
        &self.index.type_def(self.heap[obj].ty).name
    }

    pub fn invoke(&mut self, method: MethodHandle, args: Vec<Value>) -> Result<Value, String> {
        self.depth += 1;
        if self.depth > 256 {
            return Err("call depth exceeded".to_string());
        }
        let result = self.execute(method, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, handle: MethodHandle, mut args: Vec<Value>) -> Result<Value, String> {
        let index = self.index;
        let method = index.method(handle);
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| format!("{} has no body", index.method_name(handle)))?;
        let mut locals = vec![Value::Null; body.locals.len()];
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().ok_or_else(|| format!("stack underflow at {}", pc - 1))?
            };
        }

        loop {
            let instruction = body
                .instructions
                .get(pc)
                .ok_or_else(|| format!("fell off the end of {}", index.method_name(handle)))?;
            pc += 1;
            match instruction {
                Instruction::Nop => {}
                Instruction::Pop => {
                    pop!();
                }
                Instruction::Dup => {
                    let v = pop!();
                    stack.push(v.clone());
                    stack.push(v);
                }
                Instruction::LoadNull => stack.push(Value::Null),
                Instruction::LoadI4(v) => stack.push(Value::I32(*v)),
                Instruction::LoadI8(v) => stack.push(Value::I64(*v)),
                Instruction::LoadR4(v) => stack.push(Value::F32(*v)),
                Instruction::LoadR8(v) => stack.push(Value::F64(*v)),
                Instruction::LoadStr(v) => stack.push(Value::Str(v.clone())),
                Instruction::LoadToken(sig) => stack.push(Value::Type(sig.clone())),
                Instruction::LoadArg(i) => {
                    let v = args.get(*i as usize).cloned().ok_or("bad argument")?;
                    stack.push(v);
                }
                Instruction::StoreArg(i) => {
                    let v = pop!();
                    *args.get_mut(*i as usize).ok_or("bad argument")? = v;
                }
                Instruction::LoadLocal(i) => {
                    let v = locals.get(*i as usize).cloned().ok_or("bad local")?;
                    stack.push(v);
                }
                Instruction::StoreLocal(i) => {
                    let v = pop!();
                    *locals.get_mut(*i as usize).ok_or("bad local")? = v;
                }
                Instruction::LoadIndirect(_) => match pop!() {
                    Value::Addr(obj, field) => {
                        let v = self.heap[obj].fields.get(&field).cloned().ok_or("bad address")?;
                        stack.push(v);
                    }
                    other => stack.push(other),
                },
                Instruction::StoreIndirect(ty) => {
                    let v = pop!();
                    match pop!() {
                        Value::Addr(obj, field) => {
                            self.heap[obj].fields.insert(field, coerce(ty, v));
                        }
                        other => return Err(format!("store through {:?}", other)),
                    }
                }
                Instruction::Add | Instruction::Sub => {
                    let b = pop!();
                    let a = pop!();
                    let add = matches!(instruction, Instruction::Add);
                    let v = match (a, b) {
                        (Value::I32(a), Value::I32(b)) => {
                            Value::I32(if add { a.wrapping_add(b) } else { a.wrapping_sub(b) })
                        }
                        (Value::I64(a), Value::I64(b)) => {
                            Value::I64(if add { a.wrapping_add(b) } else { a.wrapping_sub(b) })
                        }
                        (a, b) => return Err(format!("arithmetic on {:?} and {:?}", a, b)),
                    };
                    stack.push(v);
                }
                Instruction::Ceq => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(Value::I32(i32::from(a == b)));
                }
                Instruction::Clt => {
                    let b = pop!();
                    let a = pop!();
                    let lt = match (a, b) {
                        (Value::I32(a), Value::I32(b)) => a < b,
                        (Value::I64(a), Value::I64(b)) => a < b,
                        (a, b) => return Err(format!("compare {:?} and {:?}", a, b)),
                    };
                    stack.push(Value::I32(i32::from(lt)));
                }
                Instruction::Br(target) => pc = *target as usize,
                Instruction::BrTrue(target) => {
                    if pop!().truthy() {
                        pc = *target as usize;
                    }
                }
                Instruction::BrFalse(target) => {
                    if !pop!().truthy() {
                        pc = *target as usize;
                    }
                }
                Instruction::Ret => {
                    return if method.return_type.is_void() {
                        Ok(Value::Null)
                    } else {
                        Ok(pop!())
                    };
                }
                Instruction::Call(target) | Instruction::CallVirt(target) => {
                    let is_virtual = matches!(instruction, Instruction::CallVirt(_));
                    if let Some(v) = self.call_ref(target, is_virtual, &mut stack)? {
                        stack.push(v);
                    }
                }
                Instruction::NewObj(ctor) => {
                    let ty = index
                        .resolve_sig(&ctor.owner)
                        .ok_or_else(|| format!("type {} not found", ctor.owner))?;
                    let handle = index
                        .resolve_method_ref(ctor)
                        .ok_or_else(|| format!("constructor {} not found", ctor))?;
                    let split = stack
                        .len()
                        .checked_sub(ctor.params.len())
                        .ok_or("stack underflow")?;
                    let ctor_args = stack.split_off(split);
                    let obj = alloc(index, &mut self.heap, ty);
                    let mut full = vec![Value::Obj(obj)];
                    full.extend(ctor_args);
                    self.invoke(handle, full)?;
                    stack.push(Value::Obj(obj));
                }
                Instruction::LoadField(f) => {
                    let obj = pop!().obj().ok_or("field load on non-object")?;
                    let v = self.heap[obj]
                        .fields
                        .get(&f.name)
                        .cloned()
                        .ok_or_else(|| format!("missing field {}", f.name))?;
                    stack.push(v);
                }
                Instruction::LoadFieldAddr(f) => {
                    let obj = pop!().obj().ok_or("field address on non-object")?;
                    stack.push(Value::Addr(obj, f.name.clone()));
                }
                Instruction::StoreField(f) => {
                    let v = pop!();
                    let obj = pop!().obj().ok_or("field store on non-object")?;
                    let fields = &mut self.heap[obj].fields;
                    if !fields.contains_key(&f.name) {
                        return Err(format!("missing field {}", f.name));
                    }
                    fields.insert(f.name.clone(), coerce(&f.ty, v));
                }
                Instruction::CastClass(sig) => {
                    let v = pop!();
                    if let Value::Obj(obj) = v {
                        let runtime = index.type_sig(self.heap[obj].ty);
                        if !index.is_assignable_from(sig, &runtime) {
                            return Err(format!("invalid cast from {} to {}", runtime, sig));
                        }
                    }
                    stack.push(v);
                }
                Instruction::IsInst(sig) => {
                    let v = pop!();
                    let keep = match v {
                        Value::Obj(obj) => {
                            index.is_assignable_from(sig, &index.type_sig(self.heap[obj].ty))
                        }
                        _ => false,
                    };
                    stack.push(if keep { v } else { Value::Null });
                }
                Instruction::Throw => return Err("exception thrown".to_string()),
            }
        }
    }

    fn call_ref(
        &mut self,
        target: &MethodRef,
        is_virtual: bool,
        stack: &mut Vec<Value>,
    ) -> Result<Option<Value>, String> {
        let index = self.index;
        let declared = index.resolve_method_ref(target);
        let has_this = declared
            .map(|h| !index.method(h).is_static())
            .unwrap_or(true);
        let count = target.params.len() + usize::from(has_this);
        let split = stack.len().checked_sub(count).ok_or("stack underflow")?;
        let args = stack.split_off(split);
        let returns = !target.return_type.is_void();

        if target.name == CONSTRUCTOR_NAME && target.owner == TypeSig::Object {
            return Ok(None);
        }
        if let Some(native) = self.natives.get(&native_key(target)) {
            let v = native(index, &mut self.heap, target, &args)?;
            return Ok(returns.then_some(v));
        }

        let handle = match (is_virtual, args.first()) {
            (true, Some(Value::Obj(obj))) => self.dispatch(*obj, target).or(declared),
            _ => declared,
        }
        .ok_or_else(|| format!("method {} not found", target))?;
        let v = self.invoke(handle, args)?;
        Ok(returns.then_some(v))
    }

    /// Most derived implementation along the receiver's base chain
    fn dispatch(&self, obj: usize, target: &MethodRef) -> Option<MethodHandle> {
        let index = self.index;
        let sig = index.type_sig(self.heap[obj].ty);
        std::iter::once(sig.clone())
            .chain(index.base_chain(&sig))
            .find_map(|sig| {
                let ty = index.resolve_sig(&sig)?;
                index
                    .type_def(ty)
                    .methods
                    .iter()
                    .position(|m| {
                        m.name == target.name
                            && m.params.len() == target.params.len()
                            && !m.is_static()
                            && m.body.is_some()
                    })
                    .map(|i| MethodHandle { ty, index: i })
            })
    }
}

// ===== Module fixtures =====

/// Constructor that only chains to `Object::.ctor`
pub fn object_ctor() -> MethodBuilder {
    MethodBuilder::constructor().code(vec![
        Instruction::LoadArg(0),
        Instruction::Call(MethodRef::new(
            TypeSig::Object,
            CONSTRUCTOR_NAME,
            vec![],
            TypeSig::Void,
        )),
        Instruction::Ret,
    ])
}

/// Constructor with an early return on its bool argument
pub fn branching_ctor() -> MethodBuilder {
    MethodBuilder::constructor()
        .param("early", TypeSig::Bool)
        .code(vec![
            Instruction::LoadArg(0),
            Instruction::Call(MethodRef::new(
                TypeSig::Object,
                CONSTRUCTOR_NAME,
                vec![],
                TypeSig::Void,
            )),
            Instruction::LoadArg(1),
            Instruction::BrFalse(5),
            Instruction::Ret,
            Instruction::Nop,
            Instruction::Ret,
        ])
}

/// Constructor taking `param` that delegates to the parameterless one of `owner`
pub fn delegating_ctor(owner: TypeSig, param: TypeSig) -> MethodBuilder {
    MethodBuilder::constructor().param("x", param).code(vec![
        Instruction::LoadArg(0),
        Instruction::Call(MethodRef::new(owner, CONSTRUCTOR_NAME, vec![], TypeSig::Void)),
        Instruction::Ret,
    ])
}

pub fn field_ref(owner: &TypeSig, name: &str, ty: TypeSig) -> FieldRef {
    FieldRef {
        owner: owner.clone(),
        name: name.to_string(),
        ty,
    }
}
