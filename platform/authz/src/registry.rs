use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use async_graphql::{
    Value,
    parser::{
        Positioned, parse_schema,
        types::{ConstDirective, FieldDefinition, ServiceDocument, TypeKind, TypeSystemDefinition},
    },
};

use crate::{
    HAS_ROLE, IS_AUTHENTICATED,
    error::SchemaError,
    policy::{AttachedDirective, PolicyDirective},
};

/// Directives defined by the GraphQL specification itself.
const BUILTIN_DIRECTIVES: &[&str] = &["deprecated"];

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldCoordinate {
    pub type_name: String,
    pub field_name: String,
}

impl FieldCoordinate {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// The policy a directive name stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    RequiresAuthentication,
    RequiresRole,
}

impl PolicyKind {
    fn build(
        self,
        directive: &ConstDirective,
        field: &FieldCoordinate,
    ) -> Result<PolicyDirective, SchemaError> {
        let name = directive.name.node.as_str();
        match self {
            PolicyKind::RequiresAuthentication => Ok(PolicyDirective::RequiresAuthentication),
            PolicyKind::RequiresRole => {
                let argument = "role";
                let value = directive
                    .arguments
                    .iter()
                    .find(|(arg, _)| arg.node.as_str() == argument)
                    .map(|(_, value)| &value.node)
                    .ok_or_else(|| SchemaError::MissingArgument {
                        field: field.clone(),
                        directive: name.to_string(),
                        argument,
                    })?;
                match value {
                    Value::String(role) => Ok(PolicyDirective::RequiresRole { role: role.clone() }),
                    _ => Err(SchemaError::InvalidArgument {
                        field: field.clone(),
                        directive: name.to_string(),
                        argument,
                    }),
                }
            }
        }
    }
}

/// Maps directive names to policies. Populated before the schema is built.
#[derive(Clone, Debug, Default)]
pub struct DirectiveRegistry {
    kinds: HashMap<String, PolicyKind>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `@isAuthenticated` and `@hasRole(role:)`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(IS_AUTHENTICATED, PolicyKind::RequiresAuthentication);
        registry.register(HAS_ROLE, PolicyKind::RequiresRole);
        registry
    }

    /// Add or replace the policy for `name`; returns the replaced one.
    pub fn register(&mut self, name: impl Into<String>, kind: PolicyKind) -> Option<PolicyKind> {
        let name = name.into();
        let previous = self.kinds.insert(name.clone(), kind);
        if let Some(previous) = previous {
            tracing::debug!(directive = %name, ?previous, ?kind, "directive policy replaced");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<PolicyKind> {
        self.kinds.get(name).copied()
    }
}

/// Policies attached to schema fields, keyed by type then field name.
#[derive(Clone, Debug, Default)]
pub struct PolicyRegistry {
    fields: HashMap<String, HashMap<String, Vec<AttachedDirective>>>,
}

impl PolicyRegistry {
    /// Read field directives from SDL type definitions (and `extend type`
    /// blocks) in declaration order. Unregistered directive names are rejected,
    /// as are registered ones placed anywhere but a field definition.
    ///
    /// Interface field policies are also attached to the same field of every
    /// implementing object type, ahead of that type's own directives.
    pub fn from_sdl(directives: &DirectiveRegistry, sdl: &str) -> Result<Self, SchemaError> {
        let document = parse(sdl)?;
        reject_misplaced(&document, directives)?;
        let mut registry = Self::default();
        for (type_name, field) in field_definitions(&document) {
            let coordinate = FieldCoordinate::new(type_name, field.node.name.node.as_str());
            let attached = field
                .node
                .directives
                .iter()
                .filter(|directive| {
                    !BUILTIN_DIRECTIVES.contains(&directive.node.name.node.as_str())
                })
                .map(|directive| {
                    let name = directive.node.name.node.as_str();
                    let kind =
                        directives
                            .get(name)
                            .ok_or_else(|| SchemaError::UnknownDirective {
                                field: coordinate.clone(),
                                directive: name.to_string(),
                                line: directive.pos.line,
                            })?;
                    Ok(AttachedDirective::new(
                        name,
                        kind.build(&directive.node, &coordinate)?,
                    ))
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            if !attached.is_empty() {
                registry.insert(coordinate, attached);
            }
        }
        registry.inherit_interface_policies(&document);
        Ok(registry)
    }

    // A field selected through `... on User` resolves with the concrete type
    // as its parent, so the interface's policies must live there too.
    fn inherit_interface_policies(&mut self, document: &ServiceDocument) {
        let mut implementations: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for definition in &document.definitions {
            if let TypeSystemDefinition::Type(ty) = definition {
                if let TypeKind::Object(object) = &ty.node.kind {
                    implementations
                        .entry(ty.node.name.node.as_str())
                        .or_default()
                        .extend(object.implements.iter().map(|name| name.node.as_str()));
                }
            }
        }

        for (object, interfaces) in implementations {
            for interface in interfaces {
                let Some(inherited) = self.fields.get(interface).cloned() else {
                    continue;
                };
                let fields = self.fields.entry(object.to_string()).or_default();
                for (field_name, mut attached) in inherited {
                    attached.extend(fields.remove(&field_name).unwrap_or_default());
                    fields.insert(field_name, attached);
                }
            }
        }
    }

    fn insert(&mut self, coordinate: FieldCoordinate, attached: Vec<AttachedDirective>) {
        self.fields
            .entry(coordinate.type_name)
            .or_default()
            .entry(coordinate.field_name)
            .or_default()
            .extend(attached);
    }

    pub fn directives_for(&self, coordinate: &FieldCoordinate) -> &[AttachedDirective] {
        self.directives_for_field(&coordinate.type_name, &coordinate.field_name)
    }

    pub fn directives_for_field(&self, type_name: &str, field_name: &str) -> &[AttachedDirective] {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of guarded fields.
    pub fn len(&self) -> usize {
        self.fields.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Guarded fields ordered by coordinate.
    pub fn iter(&self) -> impl Iterator<Item = (FieldCoordinate, &[AttachedDirective])> {
        let mut entries = self
            .fields
            .iter()
            .flat_map(|(type_name, fields)| {
                fields.iter().map(move |(field_name, attached)| {
                    (
                        FieldCoordinate::new(type_name.as_str(), field_name.as_str()),
                        attached.as_slice(),
                    )
                })
            })
            .collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter()
    }

    /// Fail when a guarded field is missing from the executable schema.
    pub fn verify_against(&self, executable_sdl: &str) -> Result<(), SchemaError> {
        let document = parse(executable_sdl)?;
        let defined = field_definitions(&document)
            .map(|(type_name, field)| {
                FieldCoordinate::new(type_name, field.node.name.node.as_str())
            })
            .collect::<BTreeSet<_>>();
        match self.iter().find(|(coordinate, _)| !defined.contains(coordinate)) {
            Some((coordinate, _)) => Err(SchemaError::UnknownField(coordinate)),
            None => Ok(()),
        }
    }
}

/// Policies only apply to field definitions; finding one on a type, schema,
/// argument, input field or enum value is an error rather than a silent no-op.
fn reject_misplaced(
    document: &ServiceDocument,
    directives: &DirectiveRegistry,
) -> Result<(), SchemaError> {
    for definition in &document.definitions {
        match definition {
            TypeSystemDefinition::Schema(schema) => {
                misplaced(directives, &schema.node.directives, || "the schema definition".into())?;
            }
            TypeSystemDefinition::Type(ty) => {
                let type_name = ty.node.name.node.as_str();
                misplaced(directives, &ty.node.directives, || format!("type `{type_name}`"))?;
                match &ty.node.kind {
                    TypeKind::Object(object) => misplaced_arguments(directives, type_name, &object.fields)?,
                    TypeKind::Interface(interface) => {
                        misplaced_arguments(directives, type_name, &interface.fields)?
                    }
                    TypeKind::InputObject(input) => {
                        for field in &input.fields {
                            misplaced(directives, &field.node.directives, || {
                                format!("input field `{type_name}.{}`", field.node.name.node)
                            })?;
                        }
                    }
                    TypeKind::Enum(enumeration) => {
                        for value in &enumeration.values {
                            misplaced(directives, &value.node.directives, || {
                                format!("enum value `{type_name}.{}`", value.node.value.node)
                            })?;
                        }
                    }
                    _ => {}
                }
            }
            TypeSystemDefinition::Directive(_) => {}
        }
    }
    Ok(())
}

fn misplaced_arguments(
    directives: &DirectiveRegistry,
    type_name: &str,
    fields: &[Positioned<FieldDefinition>],
) -> Result<(), SchemaError> {
    for field in fields {
        for argument in &field.node.arguments {
            misplaced(directives, &argument.node.directives, || {
                format!(
                    "argument `{type_name}.{}({})`",
                    field.node.name.node, argument.node.name.node
                )
            })?;
        }
    }
    Ok(())
}

fn misplaced(
    directives: &DirectiveRegistry,
    found: &[Positioned<ConstDirective>],
    location: impl FnOnce() -> String,
) -> Result<(), SchemaError> {
    match found
        .iter()
        .find(|directive| directives.get(directive.node.name.node.as_str()).is_some())
    {
        Some(directive) => Err(SchemaError::UnsupportedLocation {
            directive: directive.node.name.node.to_string(),
            location: location(),
            line: directive.pos.line,
        }),
        None => Ok(()),
    }
}

fn parse(sdl: &str) -> Result<ServiceDocument, SchemaError> {
    parse_schema(sdl).map_err(|err| SchemaError::Parse(err.to_string()))
}

fn field_definitions(
    document: &ServiceDocument,
) -> impl Iterator<Item = (&str, &Positioned<FieldDefinition>)> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            TypeSystemDefinition::Type(ty) => {
                let fields = match &ty.node.kind {
                    TypeKind::Object(object) => &object.fields,
                    TypeKind::Interface(interface) => &interface.fields,
                    _ => return None,
                };
                Some((ty.node.name.node.as_str(), fields))
            }
            _ => None,
        })
        .flat_map(|(type_name, fields)| fields.iter().map(move |field| (type_name, field)))
}
