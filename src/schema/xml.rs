//! Schema XML: the declarative on-disk/interchange form of a [`Schema`],
//! per spec §6. `quick-xml` is not a teacher dependency (SurrealQL is its
//! own schema DDL) — it is brought in from the retrieval pack's
//! `clockworklabs-SpacetimeDB` manifest, which reaches for the same crate
//! to serialize a comparable structured schema format.
//!
//! This module only loads and renders the document; it is not a query or
//! schema-definition language of its own.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::codec::EncodingKind;
use crate::err::{Error, Result};
use crate::schema::builder::{ObjectTypeBuilder, SchemaBuilder};
use crate::schema::composite::CompositeIndexDef;
use crate::schema::field::{CollectionKind, FieldDef, FieldKind, InverseDelete, ReferencePolicy};
use crate::schema::{Schema, StorageId};

fn attr(tag: &BytesStart, name: &str) -> Option<String> {
	tag.attributes().filter_map(|a| a.ok()).find(|a| a.key.as_ref() == name.as_bytes()).map(|a| {
		String::from_utf8_lossy(a.value.as_ref()).into_owned()
	})
}

fn req_attr(tag: &BytesStart, name: &str, elem: &str) -> Result<String> {
	attr(tag, name).ok_or_else(|| {
		Error::InvalidSchemaDocument(format!("<{elem}> is missing required attribute `{name}`"))
	})
}

fn parse_storage_id(tag: &BytesStart, elem: &str) -> Result<StorageId> {
	req_attr(tag, "storageId", elem)?
		.parse()
		.map_err(|_| Error::InvalidSchemaDocument(format!("<{elem} storageId=...> is not a valid integer")))
}

fn parse_bool_attr(tag: &BytesStart, name: &str, default: bool) -> bool {
	attr(tag, name).map(|v| v == "true").unwrap_or(default)
}

fn parse_encoding(s: &str) -> Result<EncodingKind> {
	Ok(match s {
		"bool" => EncodingKind::Bool,
		"int" | "long" => EncodingKind::I64,
		"uint" | "ulong" => EncodingKind::U64,
		"double" | "float" => EncodingKind::F64,
		"string" => EncodingKind::Str,
		"bytes" => EncodingKind::Bytes,
		"reference" => EncodingKind::Ref,
		"uuid" => EncodingKind::Uuid,
		"date" => EncodingKind::Date,
		other => {
			return Err(Error::InvalidSchemaDocument(format!("unknown field encoding `{other}`")))
		}
	})
}

fn encoding_name(kind: EncodingKind) -> &'static str {
	match kind {
		EncodingKind::Bool => "bool",
		EncodingKind::I64 => "long",
		EncodingKind::U64 => "ulong",
		EncodingKind::F64 => "double",
		EncodingKind::Str => "string",
		EncodingKind::Bytes => "bytes",
		EncodingKind::Ref => "reference",
		EncodingKind::Uuid => "uuid",
		EncodingKind::Date => "date",
		EncodingKind::Enum => "enum",
	}
}

/// Parses a `<Schema>` document into a builder, ready for
/// [`crate::schema::builder::SchemaBuilder::lock_down`].
pub fn parse(xml: &str) -> Result<SchemaBuilder> {
	let mut reader = Reader::from_str(xml);
	reader.trim_text(true);
	let mut builder = SchemaBuilder::new();
	loop {
		match reader
			.read_event()
			.map_err(|e| Error::InvalidSchemaDocument(e.to_string()))?
		{
			Event::Start(tag) if tag.name().as_ref() == b"Schema" => {
				loop {
					match reader
						.read_event()
						.map_err(|e| Error::InvalidSchemaDocument(e.to_string()))?
					{
						Event::Start(tag) if tag.name().as_ref() == b"ObjectType" => {
							let ty = parse_object_type(&mut reader, &tag)?;
							builder = builder.object_type(ty)?;
						}
						Event::End(tag) if tag.name().as_ref() == b"Schema" => break,
						Event::Eof => {
							return Err(Error::InvalidSchemaDocument(
								"unterminated <Schema>".into(),
							))
						}
						_ => {}
					}
				}
			}
			Event::Eof => break,
			_ => {}
		}
	}
	Ok(builder)
}

fn parse_object_type(reader: &mut Reader<&[u8]>, tag: &BytesStart) -> Result<ObjectTypeBuilder> {
	let storage_id = parse_storage_id(tag, "ObjectType")?;
	let name = req_attr(tag, "name", "ObjectType")?;
	let mut builder = ObjectTypeBuilder::new(storage_id, name);
	let mut field_names: BTreeMap<String, StorageId> = BTreeMap::new();
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::Start(child) | Event::Empty(child) => {
				let local = child.name().as_ref().to_vec();
				match local.as_slice() {
					b"SimpleField" => {
						let (fd, is_empty) = parse_simple_field(reader, &child, &local)?;
						field_names.insert(fd.name.clone(), fd.storage_id);
						builder = builder.field(fd)?;
						debug_assert!(is_empty || true);
					}
					b"CounterField" => {
						let storage_id = parse_storage_id(&child, "CounterField")?;
						let name = req_attr(&child, "name", "CounterField")?;
						field_names.insert(name.clone(), storage_id);
						builder = builder.field(FieldDef { storage_id, name, kind: FieldKind::Counter })?;
					}
					b"ReferenceField" => {
						let fd = parse_reference_field(reader, &child)?;
						field_names.insert(fd.name.clone(), fd.storage_id);
						builder = builder.field(fd)?;
					}
					b"SetField" | b"ListField" | b"MapField" => {
						let fd = parse_collection_field(reader, &child, &local)?;
						field_names.insert(fd.name.clone(), fd.storage_id);
						builder = builder.field(fd)?;
					}
					b"EnumField" => {
						let fd = parse_enum_field(reader, &child)?;
						field_names.insert(fd.name.clone(), fd.storage_id);
						builder = builder.field(fd)?;
					}
					b"CompositeIndex" => {
						let ix = parse_composite_index(reader, &child, &field_names)?;
						builder = builder.composite_index(ix)?;
					}
					other => {
						return Err(Error::InvalidSchemaDocument(format!(
							"unexpected element <{}> inside <ObjectType>",
							String::from_utf8_lossy(other)
						)))
					}
				}
			}
			Event::End(end) if end.name().as_ref() == b"ObjectType" => break,
			Event::Eof => {
				return Err(Error::InvalidSchemaDocument("unterminated <ObjectType>".into()))
			}
			_ => {}
		}
	}
	Ok(builder)
}

/// Parses a `<SimpleField>`. Top-level fields have a `storageId`; fields
/// nested inside a collection (`element`/`key`/`value`) do not — their
/// identity comes from the owning collection field.
fn parse_simple_field(
	reader: &mut Reader<&[u8]>,
	tag: &BytesStart,
	local: &[u8],
) -> Result<(FieldDef, bool)> {
	let storage_id = attr(tag, "storageId").and_then(|s| s.parse().ok()).unwrap_or(0);
	let name = req_attr(tag, "name", "SimpleField")?;
	let encoding = parse_encoding(&req_attr(tag, "encoding", "SimpleField")?)?;
	let nullable = parse_bool_attr(tag, "nullable", false);
	let indexed = parse_bool_attr(tag, "indexed", false);
	// SimpleField is self-closing in every position we emit it, but skip
	// to its end tag defensively in case a producer wrote it with a body.
	skip_to_end(reader, local)?;
	Ok((
		FieldDef { storage_id, name, kind: FieldKind::Simple { encoding, nullable, indexed } },
		true,
	))
}

fn skip_to_end(reader: &mut Reader<&[u8]>, local: &[u8]) -> Result<()> {
	// `Event::Empty` never opens a scope; only look for a matching end tag
	// when we plausibly started one. Attempt a read and, if it is
	// unrelated content before the matching end tag, keep draining.
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::End(end) if end.name().as_ref() == local => return Ok(()),
			Event::Eof => return Ok(()),
			_ => continue,
		}
	}
}

fn parse_reference_field(reader: &mut Reader<&[u8]>, tag: &BytesStart) -> Result<FieldDef> {
	let storage_id = parse_storage_id(tag, "ReferenceField")?;
	let name = req_attr(tag, "name", "ReferenceField")?;
	let indexed = parse_bool_attr(tag, "indexed", false);
	let forward_delete = parse_bool_attr(tag, "forwardDelete", false);
	let allow_dangling = parse_bool_attr(tag, "allowDangling", false);
	let inverse_delete = match attr(tag, "inverseDelete").as_deref() {
		Some("delete") => InverseDelete::Delete,
		Some("unreference") => InverseDelete::Unreference,
		Some("exception") | None => InverseDelete::Exception,
		Some(other) => {
			return Err(Error::InvalidSchemaDocument(format!(
				"unknown inverseDelete policy `{other}`"
			)))
		}
	};
	let mut allowed_types = Vec::new();
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::Start(child) if child.name().as_ref() == b"ObjectTypes" => loop {
				match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
					Event::Empty(t) | Event::Start(t) if t.name().as_ref() == b"Type" => {
						allowed_types.push(parse_storage_id(&t, "Type")?);
					}
					Event::End(end) if end.name().as_ref() == b"ObjectTypes" => break,
					Event::Eof => {
						return Err(Error::InvalidSchemaDocument("unterminated <ObjectTypes>".into()))
					}
					_ => {}
				}
			},
			Event::End(end) if end.name().as_ref() == b"ReferenceField" => break,
			Event::Eof => {
				return Err(Error::InvalidSchemaDocument("unterminated <ReferenceField>".into()))
			}
			_ => {}
		}
	}
	Ok(FieldDef {
		storage_id,
		name,
		kind: FieldKind::Reference {
			policy: ReferencePolicy { allowed_types, forward_delete, inverse_delete, allow_dangling },
			indexed,
		},
	})
}

fn parse_collection_field(
	reader: &mut Reader<&[u8]>,
	tag: &BytesStart,
	local: &[u8],
) -> Result<FieldDef> {
	let elem_name = String::from_utf8_lossy(local).into_owned();
	let storage_id = parse_storage_id(tag, &elem_name)?;
	let name = req_attr(tag, "name", &elem_name)?;
	let indexed = parse_bool_attr(tag, "indexed", false);
	let kind = match local {
		b"SetField" => CollectionKind::Set,
		b"ListField" => CollectionKind::List,
		b"MapField" => CollectionKind::Map,
		_ => unreachable!(),
	};
	let mut element = None;
	let mut value = None;
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::Start(child) | Event::Empty(child) if child.name().as_ref() == b"SimpleField" => {
				let role = attr(&child, "name").unwrap_or_default();
				let (fd, _) = parse_simple_field(reader, &child, b"SimpleField")?;
				if kind == CollectionKind::Map && role == "value" {
					value = Some(Box::new(fd.kind));
				} else {
					element = Some(Box::new(fd.kind));
				}
			}
			Event::End(end) if end.name().as_ref() == local => break,
			Event::Eof => {
				return Err(Error::InvalidSchemaDocument(format!("unterminated <{elem_name}>")))
			}
			_ => {}
		}
	}
	let element = element.ok_or_else(|| {
		Error::InvalidSchemaDocument(format!("<{elem_name}> is missing its element field"))
	})?;
	if kind == CollectionKind::Map && value.is_none() {
		return Err(Error::InvalidSchemaDocument(format!("<{elem_name}> map is missing its value field")));
	}
	Ok(FieldDef {
		storage_id,
		name,
		kind: FieldKind::Collection { kind, element, map_value: value, indexed },
	})
}

fn parse_enum_field(reader: &mut Reader<&[u8]>, tag: &BytesStart) -> Result<FieldDef> {
	let storage_id = parse_storage_id(tag, "EnumField")?;
	let name = req_attr(tag, "name", "EnumField")?;
	let indexed = parse_bool_attr(tag, "indexed", false);
	let nullable = parse_bool_attr(tag, "nullable", false);
	// Identifiers name the enum's ordinals in document order; the core
	// only ever stores the ordinal (see crate::codec::Value::Enum), so
	// the identifier text itself is not retained past parsing.
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::End(end) if end.name().as_ref() == b"EnumField" => break,
			Event::Eof => return Err(Error::InvalidSchemaDocument("unterminated <EnumField>".into())),
			_ => {}
		}
	}
	Ok(FieldDef {
		storage_id,
		name,
		kind: FieldKind::Simple { encoding: EncodingKind::Enum, nullable, indexed },
	})
}

fn parse_composite_index(
	reader: &mut Reader<&[u8]>,
	tag: &BytesStart,
	field_names: &BTreeMap<String, StorageId>,
) -> Result<CompositeIndexDef> {
	let storage_id = parse_storage_id(tag, "CompositeIndex")?;
	let name = req_attr(tag, "name", "CompositeIndex")?;
	let mut fields = Vec::new();
	loop {
		match reader.read_event().map_err(|e| Error::InvalidSchemaDocument(e.to_string()))? {
			Event::Empty(child) | Event::Start(child) if child.name().as_ref() == b"Field" => {
				let fname = req_attr(&child, "name", "Field")?;
				let sid = field_names.get(&fname).ok_or_else(|| {
					Error::InvalidSchemaDocument(format!(
						"composite index `{name}` refers to unknown field `{fname}`"
					))
				})?;
				fields.push(*sid);
			}
			Event::End(end) if end.name().as_ref() == b"CompositeIndex" => break,
			Event::Eof => {
				return Err(Error::InvalidSchemaDocument("unterminated <CompositeIndex>".into()))
			}
			_ => {}
		}
	}
	Ok(CompositeIndexDef { storage_id, name, fields })
}

/// Renders a [`Schema`] back to its XML form.
pub fn render(schema: &Schema) -> Result<String> {
	let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
	writer
		.create_element("Schema")
		.write_inner_content::<_, quick_xml::Error>(|w| {
			for ty in schema.types.values() {
				w.create_element("ObjectType")
					.with_attribute(("storageId", ty.storage_id.to_string().as_str()))
					.with_attribute(("name", ty.name.as_str()))
					.write_inner_content::<_, quick_xml::Error>(|w| {
						for f in ty.fields.values() {
							render_field(w, f)?;
						}
						for ix in ty.composite_indexes.values() {
							render_composite_index(w, ix, &ty.fields)?;
						}
						Ok(())
					})?;
			}
			Ok(())
		})
		.map_err(|e| Error::InvalidSchemaDocument(e.to_string()))?;
	String::from_utf8(writer.into_inner())
		.map_err(|e| Error::InvalidSchemaDocument(e.to_string()))
}

fn render_field(
	w: &mut Writer<Vec<u8>>,
	f: &FieldDef,
) -> std::result::Result<(), quick_xml::Error> {
	match &f.kind {
		FieldKind::Simple { encoding: EncodingKind::Enum, nullable, indexed } => {
			w.create_element("EnumField")
				.with_attribute(("storageId", f.storage_id.to_string().as_str()))
				.with_attribute(("name", f.name.as_str()))
				.with_attribute(("nullable", nullable.to_string().as_str()))
				.with_attribute(("indexed", indexed.to_string().as_str()))
				.write_empty()?;
		}
		FieldKind::Simple { encoding, nullable, indexed } => {
			w.create_element("SimpleField")
				.with_attribute(("storageId", f.storage_id.to_string().as_str()))
				.with_attribute(("name", f.name.as_str()))
				.with_attribute(("encoding", encoding_name(*encoding)))
				.with_attribute(("nullable", nullable.to_string().as_str()))
				.with_attribute(("indexed", indexed.to_string().as_str()))
				.write_empty()?;
		}
		FieldKind::Counter => {
			w.create_element("CounterField")
				.with_attribute(("storageId", f.storage_id.to_string().as_str()))
				.with_attribute(("name", f.name.as_str()))
				.write_empty()?;
		}
		FieldKind::Reference { policy, indexed } => {
			let inverse = match policy.inverse_delete {
				InverseDelete::Delete => "delete",
				InverseDelete::Unreference => "unreference",
				InverseDelete::Exception => "exception",
			};
			w.create_element("ReferenceField")
				.with_attribute(("storageId", f.storage_id.to_string().as_str()))
				.with_attribute(("name", f.name.as_str()))
				.with_attribute(("indexed", indexed.to_string().as_str()))
				.with_attribute(("forwardDelete", policy.forward_delete.to_string().as_str()))
				.with_attribute(("allowDangling", policy.allow_dangling.to_string().as_str()))
				.with_attribute(("inverseDelete", inverse))
				.write_inner_content::<_, quick_xml::Error>(|w| {
					if !policy.allowed_types.is_empty() {
						w.create_element("ObjectTypes").write_inner_content::<_, quick_xml::Error>(|w| {
							for t in &policy.allowed_types {
								w.create_element("Type")
									.with_attribute(("storageId", t.to_string().as_str()))
									.write_empty()?;
							}
							Ok(())
						})?;
					}
					Ok(())
				})?;
		}
		FieldKind::Collection { kind, element, map_value, indexed } => {
			let tag = match kind {
				CollectionKind::List => "ListField",
				CollectionKind::Set => "SetField",
				CollectionKind::Map => "MapField",
			};
			w.create_element(tag)
				.with_attribute(("storageId", f.storage_id.to_string().as_str()))
				.with_attribute(("name", f.name.as_str()))
				.with_attribute(("indexed", indexed.to_string().as_str()))
				.write_inner_content::<_, quick_xml::Error>(|w| {
					render_inline_field(w, "element", element)?;
					if let Some(mv) = map_value {
						render_inline_field(w, "value", mv)?;
					}
					Ok(())
				})?;
		}
	}
	Ok(())
}

fn render_inline_field(
	w: &mut Writer<Vec<u8>>,
	role: &str,
	kind: &FieldKind,
) -> std::result::Result<(), quick_xml::Error> {
	if let FieldKind::Simple { encoding, nullable, indexed } = kind {
		w.create_element("SimpleField")
			.with_attribute(("name", role))
			.with_attribute(("encoding", encoding_name(*encoding)))
			.with_attribute(("nullable", nullable.to_string().as_str()))
			.with_attribute(("indexed", indexed.to_string().as_str()))
			.write_empty()?;
	}
	Ok(())
}

fn render_composite_index(
	w: &mut Writer<Vec<u8>>,
	ix: &CompositeIndexDef,
	fields: &BTreeMap<StorageId, FieldDef>,
) -> std::result::Result<(), quick_xml::Error> {
	w.create_element("CompositeIndex")
		.with_attribute(("storageId", ix.storage_id.to_string().as_str()))
		.with_attribute(("name", ix.name.as_str()))
		.write_inner_content::<_, quick_xml::Error>(|w| {
			for fd in &ix.fields {
				let fname = fields.get(fd).map(|f| f.name.as_str()).unwrap_or_default();
				w.create_element("Field").with_attribute(("name", fname)).write_empty()?;
			}
			Ok(())
		})?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	const DOC: &str = r#"
	<Schema>
		<ObjectType storageId="1" name="Foo">
			<SimpleField storageId="10" name="name" encoding="string" nullable="false" indexed="true"/>
			<CounterField storageId="11" name="hits"/>
			<ReferenceField storageId="12" name="owner" indexed="true" forwardDelete="true" inverseDelete="delete" allowDangling="false">
				<ObjectTypes>
					<Type storageId="2"/>
				</ObjectTypes>
			</ReferenceField>
			<SetField storageId="13" name="tags" indexed="false">
				<SimpleField name="element" encoding="string" nullable="false" indexed="false"/>
			</SetField>
			<CompositeIndex storageId="14" name="by_name">
				<Field name="name"/>
			</CompositeIndex>
		</ObjectType>
	</Schema>
	"#;

	#[test]
	fn parses_and_locks_down() {
		let schema = parse(DOC).unwrap().lock_down();
		let ty = schema.object_type(1).unwrap();
		assert_eq!(ty.name, "Foo");
		assert_eq!(ty.fields.len(), 4);
		assert_eq!(ty.composite_indexes.len(), 1);
	}

	#[test]
	fn render_then_reparse_preserves_schema_id() {
		let schema = parse(DOC).unwrap().lock_down();
		let xml = render(&schema).unwrap();
		let reparsed = parse(&xml).unwrap().lock_down();
		assert_eq!(schema.schema_id().0, reparsed.schema_id().0);
	}
}
