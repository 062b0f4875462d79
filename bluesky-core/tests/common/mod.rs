//! Shared test objects.
#![allow(dead_code)]

use bluesky_core::{factory, Object, Payload, Result};
use std::any::Any;
use std::io::{Read, Write};

/// The classic test payload: a person with a name and an age.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i64,
}

impl Person {
    pub fn new(name: impl Into<String>, age: i64) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}

impl Payload for Person {
    fn type_id(&self) -> &'static str {
        "bs_person"
    }

    fn save_body(&self, out: &mut dyn Write) -> Result<()> {
        let bytes = self.name.as_bytes();
        out.write_all(&(bytes.len() as u64).to_le_bytes())?;
        out.write_all(bytes)?;
        out.write_all(&self.age.to_le_bytes())?;
        Ok(())
    }

    fn load_body(&mut self, input: &mut dyn Read) -> Result<()> {
        let mut len = [0u8; 8];
        input.read_exact(&mut len)?;
        let mut name = vec![0u8; u64::from_le_bytes(len) as usize];
        input.read_exact(&mut name)?;
        self.name = String::from_utf8_lossy(&name).into_owned();
        let mut age = [0u8; 8];
        input.read_exact(&mut age)?;
        self.age = i64::from_le_bytes(age);
        Ok(())
    }

    fn clone_payload(&self) -> Box<dyn Payload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Register the person type with the factory; repeated calls are fine.
pub fn register_person() {
    let _ = factory().register::<Person>("bs_person");
}

/// Fresh person object.
pub fn person(name: &str, age: i64) -> Object {
    Object::from_payload(Person::new(name, age))
}
