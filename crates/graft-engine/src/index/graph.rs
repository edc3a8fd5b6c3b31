//! Type graph queries
//!
//! Assignability, subclassing, interface implementation and override chains,
//! all answered over canonical handles so that two signatures naming the
//! same definition from different modules compare equal.

use super::{MethodHandle, ModuleIndex, TypeHandle};
use crate::bytecode::{MethodRef, TypeKind, TypeRef, TypeSig};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::hash::Hash;

/// Breadth-first search that stops at the first node `visit` accepts
///
/// Nodes are deduplicated by `key`, so cyclic graphs terminate.
pub fn bfs<N, K, I>(
    start: impl IntoIterator<Item = N>,
    mut key: impl FnMut(&N) -> K,
    mut next: impl FnMut(&N) -> I,
    mut visit: impl FnMut(&N) -> bool,
) -> bool
where
    K: Eq + Hash,
    I: IntoIterator<Item = N>,
{
    let mut seen = FxHashSet::default();
    let mut queue: VecDeque<N> = start.into_iter().collect();
    while let Some(node) = queue.pop_front() {
        if !seen.insert(key(&node)) {
            continue;
        }
        if visit(&node) {
            return true;
        }
        queue.extend(next(&node));
    }
    false
}

/// Visited-set key for a signature node
#[derive(Debug, PartialEq, Eq, Hash)]
enum NodeKey {
    Resolved(TypeHandle, Vec<TypeSig>),
    Unresolved(TypeSig),
}

/// Replace the owner's type parameters in `sig` with concrete arguments
fn substitute(sig: &TypeSig, args: &[TypeSig]) -> TypeSig {
    match sig {
        TypeSig::TypeParam(i) => args.get(*i as usize).cloned().unwrap_or_else(|| sig.clone()),
        TypeSig::Generic { base, args: inner } => TypeSig::Generic {
            base: base.clone(),
            args: inner.iter().map(|a| substitute(a, args)).collect(),
        },
        TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(substitute(inner, args))),
        TypeSig::Array(inner) => TypeSig::Array(Box::new(substitute(inner, args))),
        other => other.clone(),
    }
}

impl ModuleIndex {
    /// Structural signature equality with named types compared by identity
    ///
    /// A named type that cannot be resolved compares by its textual
    /// `(scope, name)` instead.
    pub fn types_equal(&self, a: &TypeSig, b: &TypeSig) -> bool {
        match (a, b) {
            (TypeSig::Named(x), TypeSig::Named(y)) => self.refs_equal(x, y),
            (
                TypeSig::Generic { base: x, args: xs },
                TypeSig::Generic { base: y, args: ys },
            ) => {
                self.refs_equal(x, y)
                    && xs.len() == ys.len()
                    && xs.iter().zip(ys).all(|(p, q)| self.types_equal(p, q))
            }
            (TypeSig::ByRef(x), TypeSig::ByRef(y)) | (TypeSig::Array(x), TypeSig::Array(y)) => {
                self.types_equal(x, y)
            }
            _ => a == b,
        }
    }

    fn refs_equal(&self, x: &TypeRef, y: &TypeRef) -> bool {
        match (self.resolve_type(x), self.resolve_type(y)) {
            (Some(hx), Some(hy)) => hx == hy,
            _ => x == y,
        }
    }

    fn node_key(&self, sig: &TypeSig) -> NodeKey {
        match self.resolve_sig(sig) {
            Some(handle) => NodeKey::Resolved(handle, sig.generic_args().to_vec()),
            None => NodeKey::Unresolved(sig.clone()),
        }
    }

    /// Direct base of a type, instantiated with the signature's arguments
    pub fn base_of(&self, sig: &TypeSig) -> Option<TypeSig> {
        let handle = self.resolve_sig(sig)?;
        let base = self.type_def(handle).base.as_ref()?;
        Some(substitute(base, sig.generic_args()))
    }

    /// Directly declared interfaces, instantiated with the signature's arguments
    pub fn interfaces_of(&self, sig: &TypeSig) -> Vec<TypeSig> {
        match self.resolve_sig(sig) {
            Some(handle) => self
                .type_def(handle)
                .interfaces
                .iter()
                .map(|i| substitute(i, sig.generic_args()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Strict base-type chain of `sig`, nearest first
    ///
    /// Stops at a missing or unresolvable base, and at a cycle.
    pub fn base_chain(&self, sig: &TypeSig) -> Vec<TypeSig> {
        let mut chain = Vec::new();
        let mut seen = FxHashSet::default();
        if let Some(handle) = self.resolve_sig(sig) {
            seen.insert(handle);
        }
        let mut current = self.base_of(sig);
        while let Some(base) = current {
            if let Some(handle) = self.resolve_sig(&base) {
                if !seen.insert(handle) {
                    break;
                }
            }
            current = self.base_of(&base);
            chain.push(base);
        }
        chain
    }

    /// Check if `candidate` derives from `target` (excluding itself)
    pub fn is_subclass_of(&self, candidate: &TypeSig, target: &TypeSig) -> bool {
        if self.types_equal(candidate, target) {
            return false;
        }
        self.base_chain(candidate)
            .iter()
            .any(|base| self.types_equal(base, target))
    }

    /// Check if `candidate` implements `interface`, directly, through an
    /// inherited interface, or through a base type
    pub fn implements_interface(&self, candidate: &TypeSig, interface: &TypeSig) -> bool {
        let start: Vec<TypeSig> = std::iter::once(candidate.clone())
            .chain(self.base_chain(candidate))
            .flat_map(|ty| self.interfaces_of(&ty))
            .collect();
        bfs(
            start,
            |sig| self.node_key(sig),
            |sig| self.interfaces_of(sig),
            |sig| self.types_equal(sig, interface),
        )
    }

    /// Check if a value of type `candidate` can be stored where `target` is
    /// expected
    pub fn is_assignable_from(&self, target: &TypeSig, candidate: &TypeSig) -> bool {
        if self.types_equal(target, candidate) {
            return true;
        }
        if *target == TypeSig::Object && self.is_reference_type(candidate) {
            return true;
        }
        if self.is_subclass_of(candidate, target) {
            return true;
        }
        let target_is_interface = self
            .resolve_sig(target)
            .map(|h| self.type_def(h).kind == TypeKind::Interface)
            .unwrap_or(false);
        target_is_interface && self.implements_interface(candidate, target)
    }

    fn is_reference_type(&self, sig: &TypeSig) -> bool {
        match sig {
            TypeSig::Str | TypeSig::Object | TypeSig::Type | TypeSig::Array(_) => true,
            TypeSig::Named(_) | TypeSig::Generic { .. } => self
                .resolve_sig(sig)
                .map(|h| self.type_def(h).kind != TypeKind::Struct)
                .unwrap_or(true),
            _ => false,
        }
    }

    /// Resolve a method reference to its definition
    ///
    /// Matches on owner, name, arity and parameter types.
    pub fn resolve_method_ref(&self, reference: &MethodRef) -> Option<MethodHandle> {
        let ty = self.resolve_sig(&reference.owner)?;
        self.type_def(ty)
            .methods
            .iter()
            .position(|m| {
                m.name == reference.name
                    && m.params.len() == reference.params.len()
                    && m.params
                        .iter()
                        .zip(&reference.params)
                        .all(|(p, r)| self.types_equal(&p.ty, r))
            })
            .map(|index| MethodHandle { ty, index })
    }

    /// Check if `method` overrides `target` through its declared override
    /// chain
    pub fn overrides(&self, method: MethodHandle, target: MethodHandle) -> bool {
        let start: Vec<MethodHandle> = self.declared_overrides(method);
        bfs(
            start,
            |handle| *handle,
            |handle| self.declared_overrides(*handle),
            |handle| *handle == target,
        )
    }

    fn declared_overrides(&self, method: MethodHandle) -> Vec<MethodHandle> {
        self.method(method)
            .overrides
            .iter()
            .filter_map(|r| self.resolve_method_ref(r))
            .collect()
    }
}
