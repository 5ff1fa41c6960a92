//! Conversion between datascript modules and bedrock namespace metadata.

pub mod from_bedrock;
pub mod to_bedrock;

pub use from_bedrock::{codegen, from_bedrock};
pub use to_bedrock::to_bedrock;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datascript::parser::parse_module;
    use crate::datascript::render::render_module;
    use crate::schema::identifier::{IdBase, Identifier};
    use crate::schema::lookup::SchemaLookup;
    use crate::schema::metadata::{ArtifactMetadata, NamespaceMetadata};
    use indexmap::IndexMap;

    const PEOPLE: &str = r#"
namespace people

composite Address {
  street: string
  zip: nullable int
}

entity Person {
  id pid: string
  home: nullable Address
}

index PersonIndex {
  pid: string
}

features PersonFeatures {
  name: string
  born: datetime
}

table person {
  doc: "registered residents"
  entity: Person
  index: PersonIndex
  features: PersonFeatures
  partition: pid
  max_rows: 100000
}
"#;

    const DOGS: &str = r#"
namespace dogs
use entity people/Person
use index people/PersonIndex
use composite people/Address

entity Animal {
  id animal_id: string
}

entity Pet(Animal) {
  pet_name: string
}

entity Dog(Pet, Animal) {
  id dog_id: string
  owner: nullable Person
  birthplace: Address
  shout = dog_id + "!"
}

index DogIndex {
  dog_id: string
}

features DogFeatures {
  walker: PersonIndex
  sire: nullable DogIndex
  weight: float
  chipped: bool
  chip: nullable bytes
  litter: int
}

table dog {
  entity: Dog
  index: DogIndex
  features: DogFeatures
  key owner: people/person
}

features WalkFeatures {
  dog: DogIndex
  minutes: int
}

table walk {
  entity: Dog
  features: WalkFeatures
}
"#;

    fn forward(texts: &[&str]) -> IndexMap<String, NamespaceMetadata> {
        let modules: Vec<_> = texts
            .iter()
            .map(|t| parse_module(t, "inline.ds").unwrap())
            .collect();
        to_bedrock(&modules, "zoo", &IndexMap::new()).unwrap()
    }

    /// Order-insensitive form without descriptions.
    fn normalized(ns: &NamespaceMetadata) -> NamespaceMetadata {
        let mut ns = ns.clone();
        ns.composite_types.sort_by(|a, b| a.name.cmp(&b.name));
        ns.entity_classes.sort_by(|a, b| a.name.cmp(&b.name));
        ns.tables.sort_by(|a, b| a.name.cmp(&b.name));
        for c in &mut ns.composite_types {
            c.description = None;
        }
        for e in &mut ns.entity_classes {
            e.description = None;
        }
        for t in &mut ns.tables {
            t.description = None;
        }
        ns
    }

    #[test]
    fn test_tb011_forward_reverse_forward_is_identity() {
        let first = forward(&[PEOPLE, DOGS]);

        let regenerated: Vec<String> = first
            .values()
            .map(|ns| codegen(ns, &IdBase::namespace(ns.name.clone())).unwrap())
            .collect();
        let texts: Vec<&str> = regenerated.iter().map(String::as_str).collect();
        let second = forward(&texts);

        assert_eq!(first.len(), second.len());
        for (name, ns) in &first {
            assert_eq!(normalized(ns), normalized(&second[name]), "namespace {}", name);
        }
    }

    #[test]
    fn test_tb011_regenerated_text_is_stable() {
        let first = forward(&[PEOPLE, DOGS]);
        let dogs = &first["dogs"];
        let base = IdBase::namespace("dogs");
        let once = codegen(dogs, &base).unwrap();
        let reparsed = parse_module(&once, "dogs.ds").unwrap();
        assert_eq!(render_module(&reparsed), once);
        assert!(once.contains("entity Dog(Pet) {"));
        assert!(once.contains("  walker: people/PersonIndex\n"));
        assert!(once.contains("  key owner: people/person\n"));
    }

    #[test]
    fn test_tb006_flatten_converted_self_key() {
        let mut zoo = ArtifactMetadata::new("zoo");
        for ns in forward(&[PEOPLE, DOGS]).into_values() {
            zoo.add_namespace(ns);
        }
        let imported = IndexMap::new();
        let lookup = SchemaLookup::new(&zoo, &imported);

        let dog: Vec<String> = lookup
            .flatten_columns(&Identifier::in_namespace("dogs", "dog"))
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(dog[0], "dog_id");
        assert!(dog.contains(&"walker__pid".to_string()));
        assert!(dog.contains(&"sire__dog_id".to_string()));

        let walk = lookup
            .flatten_columns(&Identifier::in_namespace("dogs", "walk"))
            .unwrap();
        assert_eq!(walk[0].name, "dog__dog_id");
    }
}
