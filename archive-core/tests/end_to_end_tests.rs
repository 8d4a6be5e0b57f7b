/*!
End-to-end tests for archive sessions.
These tests write object graphs through both codecs and check that reading
restores values, aliasing, polymorphic classes and shared ownership.
*/

use archive_core::{
    open_reader, open_writer, register_class, set_library_version, Archivable, Archive,
    ArchiveConfig, ArchiveError, BinaryReader, BinaryWriter, ClassInfo, Dynamic, Pointee, Ptr,
    Result, Shared, TextReader, TextWriter, TypeRegistry, VersionInfo, VersionTable,
};
use num_complex::Complex;
use proptest::prelude::*;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tempfile::TempDir;

trait Shape: Dynamic {
    fn area(&self) -> f64;
}
impl Pointee for dyn Shape {}

trait Named: Dynamic {
    fn name(&self) -> String;
}
impl Pointee for dyn Named {}

trait Solid: Shape {
    fn volume(&self) -> f64;
}
impl Pointee for dyn Solid {}

#[derive(Default, Debug)]
struct Circle {
    radius: f64,
    label: String,
}

impl Archivable for Circle {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.radius)?;
        ar.archive(&mut self.label)
    }
}

impl Shape for Circle {
    fn area(&self) -> f64 {
        3.0 * self.radius * self.radius
    }
}

impl Named for Circle {
    fn name(&self) -> String {
        self.label.clone()
    }
}

#[derive(Default, Debug)]
struct Square {
    side: f64,
}

impl Archivable for Square {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.side)
    }
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

#[derive(Default, Debug)]
struct Cube {
    edge: f64,
}

impl Archivable for Cube {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.edge)
    }
}

impl Shape for Cube {
    fn area(&self) -> f64 {
        6.0 * self.edge * self.edge
    }
}

impl Solid for Cube {
    fn volume(&self) -> f64 {
        self.edge * self.edge * self.edge
    }
}

/// Only constructible from code, never by the archive
#[derive(Debug)]
struct Anchor {
    weight: i32,
}

impl Archivable for Anchor {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.weight)
    }
}

impl Shape for Anchor {
    fn area(&self) -> f64 {
        0.0
    }
}

#[derive(Default)]
struct Drawing {
    title: String,
    shapes: Vec<Option<Ptr<dyn Shape>>>,
    highlight: Option<Ptr<dyn Shape>>,
    caption: Option<Ptr<dyn Named>>,
}

impl Archivable for Drawing {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.title)?;
        ar.archive(&mut self.shapes)?;
        ar.archive(&mut self.highlight)?;
        ar.archive(&mut self.caption)
    }
}

#[derive(Default)]
struct Views {
    shape: Option<Shared<dyn Shape>>,
    named: Option<Shared<dyn Named>>,
    exact: Option<Shared<Circle>>,
}

impl Archivable for Views {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.shape)?;
        ar.archive(&mut self.named)?;
        ar.archive(&mut self.exact)
    }
}

#[derive(Default)]
struct Node {
    value: i32,
    next: Option<Ptr<Node>>,
}

impl Archivable for Node {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.value)?;
        ar.archive(&mut self.next)
    }
}

#[derive(Default)]
struct SharedNode {
    value: i32,
    next: Option<Shared<SharedNode>>,
}

impl Archivable for SharedNode {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.value)?;
        ar.archive(&mut self.next)
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct Everything {
    small: i8,
    short: i16,
    flag: bool,
    count: usize,
    text: String,
    lookup: HashMap<String, i64>,
    ordered: BTreeMap<i32, String>,
    fixed: [u8; 4],
    nested: Vec<Vec<i16>>,
    spectrum: Vec<Complex<f64>>,
    present: Option<Vec<u8>>,
    absent: Option<Vec<u8>>,
    ids: Vec<u64>,
}

impl Archivable for Everything {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.small)?;
        ar.archive(&mut self.short)?;
        ar.archive(&mut self.flag)?;
        ar.archive(&mut self.count)?;
        ar.archive(&mut self.text)?;
        ar.archive(&mut self.lookup)?;
        ar.archive(&mut self.ordered)?;
        ar.archive(&mut self.fixed)?;
        ar.archive(&mut self.nested)?;
        ar.archive(&mut self.spectrum)?;
        ar.archive(&mut self.present)?;
        ar.archive(&mut self.absent)?;
        ar.archive(&mut self.ids)
    }
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    register_class!(registry, "Shape" => view dyn Shape).unwrap();
    register_class!(registry, "Named" => view dyn Named).unwrap();
    register_class!(registry, "Solid" => view dyn Solid: dyn Shape).unwrap();
    register_class!(registry, "Circle" => Circle: dyn Shape, dyn Named).unwrap();
    register_class!(registry, "Square" => Square: dyn Shape).unwrap();
    register_class!(registry, "Cube" => Cube: dyn Solid).unwrap();
    registry
        .register(
            ClassInfo::without_default::<Anchor>("Anchor")
                .with_base::<dyn Shape>(|p: Shared<Anchor>| -> Shared<dyn Shape> { p }),
        )
        .unwrap();
    registry
}

fn configs() -> [ArchiveConfig; 2] {
    [ArchiveConfig::binary(), ArchiveConfig::text()]
}

fn shape<S: Shape>(value: S) -> Ptr<dyn Shape> {
    let rc: Shared<dyn Shape> = Rc::new(RefCell::new(value));
    Ptr::from_rc(rc)
}

fn same<A: ?Sized, B: ?Sized>(a: &Shared<A>, b: &Shared<B>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

fn write_bytes<T: Archivable>(config: &ArchiveConfig, registry: &TypeRegistry, value: &mut T) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut ar = open_writer(config, &mut bytes, registry, VersionTable::new()).unwrap();
    ar.archive(value).unwrap();
    ar.finish().unwrap();
    bytes
}

fn read_bytes<T: Archivable + Default>(config: &ArchiveConfig, registry: &TypeRegistry, bytes: &[u8]) -> Result<T> {
    let mut value = T::default();
    let mut ar = open_reader(config, bytes, registry)?;
    ar.archive(&mut value)?;
    Ok(value)
}

fn round_trip<T: Archivable + Default>(config: &ArchiveConfig, registry: &TypeRegistry, value: &mut T) -> T {
    let bytes = write_bytes(config, registry, value);
    read_bytes(config, registry, &bytes).unwrap()
}

#[test]
fn test_values_and_containers() {
    let registry = TypeRegistry::new();
    let mut value = Everything {
        small: -7,
        short: 1234,
        flag: true,
        count: 99,
        text: "two\nlines".to_string(),
        lookup: HashMap::from([("a".to_string(), 1), ("b".to_string(), -2)]),
        ordered: BTreeMap::from([(3, "three".to_string()), (-1, String::new())]),
        fixed: [1, 2, 3, 255],
        nested: vec![vec![1, -1], vec![], vec![i16::MAX]],
        spectrum: vec![Complex::new(0.5, -1.25), Complex::new(1e-9, 3.0)],
        present: Some(b"raw\0bytes".to_vec()),
        absent: None,
        ids: vec![0, u64::MAX],
    };

    for config in configs() {
        let restored = round_trip(&config, &registry, &mut value);
        assert_eq!(restored, value, "format {:?}", config.format);
    }
}

#[test]
fn test_aliased_plain_pointers() {
    let registry = registry();
    for config in configs() {
        let circle = Rc::new(RefCell::new(Circle {
            radius: 2.0,
            label: "wheel".to_string(),
        }));
        let as_shape: Shared<dyn Shape> = circle.clone();
        let as_named: Shared<dyn Named> = circle.clone();
        let mut drawing = Drawing {
            title: "bike".to_string(),
            shapes: vec![Some(Ptr::from_rc(as_shape.clone())), Some(Ptr::from_rc(as_shape))],
            highlight: None,
            caption: Some(Ptr::from_rc(as_named)),
        };

        let restored = round_trip(&config, &registry, &mut drawing);
        assert_eq!(restored.title, "bike");
        let first = restored.shapes[0].as_ref().unwrap();
        let second = restored.shapes[1].as_ref().unwrap();
        let caption = restored.caption.as_ref().unwrap();
        assert!(first.same_object(second));
        assert!(first.same_object(caption));
        assert!(restored.highlight.is_none());
        assert_eq!(first.borrow().area(), 12.0);
        assert_eq!(caption.borrow().name(), "wheel");
    }
}

#[test]
fn test_polymorphic_vector() {
    let registry = registry();
    let square = shape(Square { side: 1.5 });
    let mut drawing = Drawing {
        title: String::new(),
        shapes: vec![
            shape(Circle {
                radius: 1.0,
                label: "c".to_string(),
            })
            .into(),
            Some(square.clone()),
            None,
            shape(Cube { edge: 2.0 }).into(),
        ],
        highlight: Some(square),
        caption: None,
    };

    for config in configs() {
        let restored = round_trip(&config, &registry, &mut drawing);
        assert_eq!(restored.shapes.len(), 4);
        let areas: Vec<Option<f64>> = restored
            .shapes
            .iter()
            .map(|s| s.as_ref().map(|s| s.borrow().area()))
            .collect();
        assert_eq!(areas, vec![Some(3.0), Some(2.25), None, Some(24.0)]);

        let circle = restored.shapes[0].as_ref().unwrap().borrow();
        assert_eq!(circle.as_any().downcast_ref::<Circle>().unwrap().label, "c");
        assert!(restored.shapes[3]
            .as_ref()
            .unwrap()
            .borrow()
            .as_any()
            .is::<Cube>());
        assert!(restored.shapes[1]
            .as_ref()
            .unwrap()
            .same_object(restored.highlight.as_ref().unwrap()));
    }
}

#[test]
fn test_shared_pointers_across_views() {
    let registry = registry();
    for config in configs() {
        let circle = Rc::new(RefCell::new(Circle {
            radius: 1.0,
            label: "before".to_string(),
        }));
        let mut views = Views {
            shape: Some(circle.clone()),
            named: Some(circle.clone()),
            exact: Some(circle),
        };

        let restored = round_trip(&config, &registry, &mut views);
        let shape = restored.shape.unwrap();
        let named = restored.named.unwrap();
        let exact = restored.exact.unwrap();
        assert!(same(&shape, &named));
        assert!(same(&shape, &exact));

        exact.borrow_mut().label = "after".to_string();
        exact.borrow_mut().radius = 2.0;
        assert_eq!(named.borrow().name(), "after");
        assert_eq!(shape.borrow().area(), 12.0);
    }
}

#[test]
fn test_null_pointers() {
    let registry = registry();
    for config in configs() {
        let restored = round_trip(&config, &registry, &mut Views::default());
        assert!(restored.shape.is_none());
        assert!(restored.named.is_none());
        assert!(restored.exact.is_none());

        let restored = round_trip(&config, &registry, &mut Drawing::default());
        assert!(restored.shapes.is_empty());
        assert!(restored.highlight.is_none());
    }
}

#[test]
fn test_plain_pointer_cycle() {
    let registry = TypeRegistry::new();
    let a = Ptr::new(Node { value: 1, next: None });
    let b = Ptr::new(Node {
        value: 2,
        next: Some(a.clone()),
    });
    a.borrow_mut().next = Some(b);

    for config in configs() {
        let mut root = Some(a.clone());
        let restored = round_trip(&config, &registry, &mut root).unwrap();
        let next = restored.borrow().next.clone().unwrap();
        let back = next.borrow().next.clone().unwrap();
        assert_eq!(restored.borrow().value, 1);
        assert_eq!(next.borrow().value, 2);
        assert!(back.same_object(&restored));
    }
}

#[test]
fn test_shared_pointer_cycle() {
    let registry = TypeRegistry::new();
    let a = Rc::new(RefCell::new(SharedNode { value: 10, next: None }));
    let b = Rc::new(RefCell::new(SharedNode {
        value: 20,
        next: Some(a.clone()),
    }));
    a.borrow_mut().next = Some(b);

    for config in configs() {
        let mut root = Some(a.clone());
        let restored = round_trip(&config, &registry, &mut root).unwrap();
        let next = restored.borrow().next.clone().unwrap();
        let back = next.borrow().next.clone().unwrap();
        assert_eq!(next.borrow().value, 20);
        assert!(Rc::ptr_eq(&back, &restored));
    }
}

#[test]
fn test_class_reached_through_view_chain() {
    let registry = registry();
    let cube: Shared<dyn Solid> = Rc::new(RefCell::new(Cube { edge: 3.0 }));
    let as_shape: Shared<dyn Shape> = cube.clone();
    let mut views = Views {
        shape: Some(as_shape),
        named: None,
        exact: None,
    };

    for config in configs() {
        let restored = round_trip(&config, &registry, &mut views);
        let shape = restored.shape.unwrap();
        assert_eq!(shape.borrow().area(), 54.0);
        assert!(shape.borrow().as_any().is::<Cube>());
    }
}

#[test]
fn test_unregistered_class_on_write() {
    let mut registry = TypeRegistry::new();
    register_class!(registry, "Circle" => Circle: dyn Shape).unwrap();
    let mut drawing = Drawing {
        shapes: vec![Some(shape(Square { side: 1.0 }))],
        ..Drawing::default()
    };

    let mut bytes = Vec::new();
    let mut ar = Archive::new(BinaryWriter::new(&mut bytes), &registry).unwrap();
    match ar.archive(&mut drawing) {
        Err(ArchiveError::UnregisteredType(name)) => assert!(name.contains("Square")),
        other => panic!("expected UnregisteredType, got {other:?}"),
    }
}

#[test]
fn test_unregistered_name_on_read() {
    let full = registry();
    let mut partial = TypeRegistry::new();
    register_class!(partial, "Square" => Square: dyn Shape).unwrap();

    let mut drawing = Drawing {
        shapes: vec![Some(shape(Circle::default()))],
        ..Drawing::default()
    };
    for config in configs() {
        let bytes = write_bytes(&config, &full, &mut drawing);
        match read_bytes::<Drawing>(&config, &partial, &bytes) {
            Err(ArchiveError::UnregisteredType(name)) => assert_eq!(name, "Circle"),
            other => panic!("expected UnregisteredType, got {:?}", other.err()),
        }
    }
}

#[test]
fn test_class_without_default_is_written_but_not_read() {
    let registry = registry();
    let mut drawing = Drawing {
        shapes: vec![Some(shape(Anchor { weight: 5 }))],
        ..Drawing::default()
    };
    for config in configs() {
        let bytes = write_bytes(&config, &registry, &mut drawing);
        assert!(matches!(
            read_bytes::<Drawing>(&config, &registry, &bytes),
            Err(ArchiveError::NoDefaultConstructor(name)) if name == "Anchor"
        ));
    }
}

#[test]
fn test_abstract_static_type_cannot_be_constructed() {
    let registry = registry();
    // An exact-type marker for a trait-object view has no class to create
    let mut bytes = Vec::new();
    {
        let mut ar =
            Archive::with_versions(TextWriter::new(&mut bytes), &registry, VersionTable::new())
                .unwrap();
        ar.archive(&mut -1i32).unwrap();
        ar.finish().unwrap();
    }
    let mut ar = Archive::new(TextReader::new(bytes.as_slice()), &registry).unwrap();
    let mut ptr: Option<Ptr<dyn Shape>> = None;
    assert!(matches!(
        ar.archive(&mut ptr),
        Err(ArchiveError::NoDefaultConstructor(_))
    ));
}

#[test]
fn test_class_read_as_unrelated_view() {
    let registry = registry();
    let mut drawing = Drawing {
        highlight: Some(shape(Square { side: 2.0 })),
        ..Drawing::default()
    };
    let bytes = write_bytes(&ArchiveConfig::text(), &registry, &mut drawing);

    // Same layout as Drawing, but the highlight is read as a Named
    #[derive(Default)]
    struct Mislabeled {
        title: String,
        shapes: Vec<Option<Ptr<dyn Shape>>>,
        highlight: Option<Ptr<dyn Named>>,
    }

    impl Archivable for Mislabeled {
        fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
            ar.archive(&mut self.title)?;
            ar.archive(&mut self.shapes)?;
            ar.archive(&mut self.highlight)
        }
    }

    assert!(matches!(
        read_bytes::<Mislabeled>(&ArchiveConfig::text(), &registry, &bytes),
        Err(ArchiveError::CastFailed { .. })
    ));
}

#[test]
fn test_borrowed_object_is_reported() {
    let registry = registry();
    let circle = Rc::new(RefCell::new(Circle::default()));
    let as_shape: Shared<dyn Shape> = circle.clone();
    let mut drawing = Drawing {
        shapes: vec![Some(Ptr::from_rc(as_shape))],
        ..Drawing::default()
    };

    let _guard = circle.borrow_mut();
    let mut bytes = Vec::new();
    let mut ar = Archive::new(BinaryWriter::new(&mut bytes), &registry).unwrap();
    assert!(matches!(
        ar.archive(&mut drawing),
        Err(ArchiveError::AlreadyBorrowed(_))
    ));
}

#[test]
fn test_truncated_stream() {
    let registry = registry();
    let mut drawing = Drawing {
        title: "a fairly long title".to_string(),
        shapes: vec![Some(shape(Circle {
            radius: 4.0,
            label: "big".to_string(),
        }))],
        ..Drawing::default()
    };

    for config in configs() {
        let bytes = write_bytes(&config, &registry, &mut drawing);
        // Dropping the last three bytes removes the final null marker in both formats
        for cut in [bytes.len() / 2, bytes.len() - 3] {
            let err = read_bytes::<Drawing>(&config, &registry, &bytes[..cut]).err().unwrap();
            assert!(err.is_stream_failure(), "cut at {cut}: {err}");
        }
    }
}

#[test]
fn test_version_header() {
    let registry = TypeRegistry::new();
    let mut versions = VersionTable::new();
    versions.insert("geom".to_string(), VersionInfo::new(1, 2, 3));
    versions.insert("mesh".to_string(), VersionInfo::new(0, 4, 0).with_suffix("rc1"));

    for config in configs() {
        let mut bytes = Vec::new();
        open_writer(&config, &mut bytes, &registry, versions.clone())
            .unwrap()
            .finish()
            .unwrap();

        let ar = open_reader(&config, bytes.as_slice(), &registry).unwrap();
        assert_eq!(ar.version("geom"), Some(&VersionInfo::new(1, 2, 3)));
        assert_eq!(ar.versions(), &versions);
        assert!(ar.version("missing").is_none());
    }
}

#[test]
fn test_process_versions_written_by_default() {
    let registry = TypeRegistry::new();
    set_library_version("end_to_end_lib", VersionInfo::new(7, 0, 1));

    let mut bytes = Vec::new();
    Archive::new(BinaryWriter::new(&mut bytes), &registry)
        .unwrap()
        .finish()
        .unwrap();

    let ar = Archive::new(BinaryReader::new(bytes.as_slice()), &registry).unwrap();
    assert_eq!(ar.version("end_to_end_lib"), Some(&VersionInfo::new(7, 0, 1)));
}

#[test]
fn test_files_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let registry = registry();
    let mut drawing = Drawing {
        title: "disk".to_string(),
        shapes: vec![Some(shape(Square { side: 4.0 }))],
        ..Drawing::default()
    };

    let binary_path = temp_dir.path().join("drawing.bin");
    let mut ar = Archive::new(BinaryWriter::create(&binary_path).unwrap(), &registry).unwrap();
    ar.archive(&mut drawing).unwrap();
    ar.finish().unwrap();

    let text_path = temp_dir.path().join("drawing.txt");
    let mut ar = Archive::new(TextWriter::create(&text_path).unwrap(), &registry).unwrap();
    ar.archive(&mut drawing).unwrap();
    ar.finish().unwrap();

    let mut from_binary = Drawing::default();
    let mut ar = Archive::new(BinaryReader::open(&binary_path).unwrap(), &registry).unwrap();
    ar.archive(&mut from_binary).unwrap();

    let mut from_text = Drawing::default();
    let mut ar = Archive::new(TextReader::open(&text_path).unwrap(), &registry).unwrap();
    ar.archive(&mut from_text).unwrap();

    for restored in [from_binary, from_text] {
        assert_eq!(restored.title, "disk");
        assert_eq!(restored.shapes[0].as_ref().unwrap().borrow().area(), 16.0);
    }
}

proptest! {
    #[test]
    fn prop_numbers_round_trip(
        floats in proptest::collection::vec(-1e300f64..1e300, 0..64),
        ints in proptest::collection::vec(any::<i64>(), 0..64),
        shorts in proptest::collection::vec(any::<i16>(), 0..64),
    ) {
        let registry = TypeRegistry::new();
        for config in configs() {
            let mut value = (floats.clone(), ints.clone(), shorts.clone());
            let bytes = {
                let mut bytes = Vec::new();
                let mut ar = open_writer(&config, &mut bytes, &registry, VersionTable::new()).unwrap();
                ar.archive(&mut value.0).unwrap();
                ar.archive(&mut value.1).unwrap();
                ar.archive(&mut value.2).unwrap();
                ar.finish().unwrap();
                bytes
            };

            let mut ar = open_reader(&config, bytes.as_slice(), &registry).unwrap();
            let (mut f, mut i, mut s) = (Vec::<f64>::new(), Vec::<i64>::new(), Vec::<i16>::new());
            ar.archive(&mut f).unwrap();
            ar.archive(&mut i).unwrap();
            ar.archive(&mut s).unwrap();
            prop_assert_eq!(&f, &floats);
            prop_assert_eq!(&i, &ints);
            prop_assert_eq!(&s, &shorts);
        }
    }

    #[test]
    fn prop_strings_round_trip(strings in proptest::collection::vec("\\PC*", 0..16)) {
        let registry = TypeRegistry::new();
        for config in configs() {
            let mut value = strings.clone();
            let restored = round_trip(&config, &registry, &mut value);
            prop_assert_eq!(&restored, &strings);
        }
    }
}
