use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};

use crate::{
    block::{BLOCK_SIZE, storage::mem::MemStorage},
    fs::{Config, Filesystem, error::Error as FsError, node::NAME_MAX_LEN},
    kernel::{
        Kernel,
        error::Error,
        fd::{Descriptor, FIRST_FILE, Fd},
        process::Process,
    },
};

const MAX_OPEN: usize = 16;

fn new_kernel() -> Kernel<MemStorage> {
    let config = Config {
        node_count: 64,
        block_limit: None,
    };
    let fs = Filesystem::format(MemStorage::new(64), &config).unwrap();
    Kernel::new(fs)
}

fn available(kernel: &Kernel<MemStorage>) -> u64 {
    kernel.with_fs(|fs| fs.available_blocks())
}

#[test]
fn unlinked_name_cannot_be_opened() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    process.creat("test").unwrap();

    process.unlink("test").unwrap();
    assert_eq!(process.open("test"), Err(Error::Fs(FsError::NotFound)));
}

#[test]
fn open_descriptors_survive_unlink() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    let fd1 = process.creat("test").unwrap();
    let fd2 = process.open("test").unwrap();

    assert_eq!(process.write(fd1, b"hihi").unwrap(), 4);
    process.unlink("test").unwrap();

    let mut buf = [0u8; 8];
    // fd1's cursor sits at the end of what it wrote
    assert_eq!(process.read(fd1, &mut buf).unwrap(), 0);
    assert_eq!(process.read(fd2, &mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"hihi");

    // Both keep writing to the unlinked file
    assert_eq!(process.write(fd1, b"++").unwrap(), 2);
    assert_eq!(process.read(fd2, &mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"++");
}

#[test]
fn second_unlink_fails() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    process.creat("test").unwrap();

    process.unlink("test").unwrap();
    assert_eq!(process.unlink("test"), Err(Error::Fs(FsError::NotFound)));
}

#[test]
fn unlink_nonexistent_fails() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    assert_eq!(process.unlink("randomName"), Err(Error::Fs(FsError::NotFound)));
}

#[test]
fn unlink_long_name_leaves_table_alone() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    let name = "a".repeat(NAME_MAX_LEN);
    process.creat(&name).unwrap();

    let too_long = "a".repeat(NAME_MAX_LEN + 1);
    assert_eq!(process.unlink(&too_long), Err(Error::Fs(FsError::NameTooLong)));
    assert!(process.open(&name).is_ok());
    assert_eq!(kernel.with_fs(|fs| fs.node_count()), 1);
}

#[test]
fn descriptors_reused_only_after_close() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    let fds: Vec<_> = (0..MAX_OPEN)
        .map(|i| process.creat(&format!("file{i}")).unwrap())
        .collect();
    assert_eq!(fds, (FIRST_FILE..FIRST_FILE + MAX_OPEN).collect::<Vec<_>>());
    assert_eq!(process.open("file0"), Err(Error::ResourceExhausted));

    process.close(fds[5]).unwrap();
    assert_eq!(process.open("file0").unwrap(), fds[5]);
    assert_eq!(process.creat("another"), Err(Error::ResourceExhausted));
}

#[test]
fn separate_opens_have_separate_cursors() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    let fd1 = process.creat("test").unwrap();
    let fd2 = process.open("test").unwrap();
    assert_ne!(fd1, fd2);

    process.write(fd1, b"abcdef").unwrap();
    let mut buf = [0u8; 3];
    assert_eq!(process.read(fd2, &mut buf).unwrap(), 3);
    assert_eq!(&buf, b"abc");

    process.write(fd2, b"XY").unwrap();
    let mut buf = [0u8; 6];
    let fd3 = process.open("test").unwrap();
    assert_eq!(process.read(fd3, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"abcXYf");
}

#[test]
fn recreated_name_is_a_new_file() {
    let kernel = new_kernel();
    let mut process = kernel.spawn();
    let old = process.creat("test").unwrap();
    process.write(old, b"old contents").unwrap();
    process.unlink("test").unwrap();
    assert!(process.open("test").is_err());

    let new = process.creat("test").unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(process.read(new, &mut buf).unwrap(), 0);

    process.write(new, b"new").unwrap();
    // Writes through the old descriptor stay with the unlinked file
    assert_eq!(process.write(old, b" and more").unwrap(), 9);

    let reader = process.open("test").unwrap();
    assert_eq!(process.read(reader, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"new");

    let id = kernel.with_fs(|fs| fs.lookup("test")).unwrap();
    assert_eq!(kernel.with_fs(|fs| fs.stat(id)).unwrap().size, 3);
}

#[test]
fn storage_reclaimed_on_last_close() {
    let kernel = new_kernel();
    let before = available(&kernel);
    let mut process = kernel.spawn();
    let fd1 = process.creat("test").unwrap();
    let fd2 = process.open("test").unwrap();
    process.write(fd1, &[0xAB; BLOCK_SIZE as usize * 2]).unwrap();
    let used = before - available(&kernel);
    assert_eq!(used, 2);

    process.unlink("test").unwrap();
    process.close(fd1).unwrap();
    assert_eq!(available(&kernel), before - used);

    process.close(fd2).unwrap();
    assert_eq!(available(&kernel), before);
}

#[test]
fn processes_share_files_not_descriptors() {
    let kernel = new_kernel();
    let mut writer = kernel.spawn();
    let mut reader = kernel.spawn();

    let wfd = writer.creat("shared").unwrap();
    let rfd = reader.open("shared").unwrap();
    assert_eq!(wfd, rfd);

    writer.write(wfd, b"ping").unwrap();
    writer.unlink("shared").unwrap();
    drop(writer);

    let mut buf = [0u8; 4];
    assert_eq!(reader.read(rfd, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"ping");
    assert_eq!(kernel.open_file_count(), 1);
}

#[test]
fn concurrent_processes() {
    let kernel = new_kernel();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let kernel = kernel.clone();
            std::thread::spawn(move || {
                let mut process = kernel.spawn();
                let name = format!("file{i}");
                for _ in 0..32 {
                    let fd = process.creat(&name).unwrap();
                    process.write(fd, name.as_bytes()).unwrap();
                    process.unlink(&name).unwrap();
                    process.close(fd).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(kernel.open_file_count(), 0);
    assert_eq!(kernel.with_fs(|fs| fs.node_count()), 0);
}

// Reference model of the syscall surface

const NAMES: [&str; 3] = ["a", "b", "c"];

fn arb_name() -> impl Strategy<Value = String> {
    proptest::sample::select(NAMES.map(str::to_owned).to_vec())
}

fn arb_fd() -> impl Strategy<Value = Fd> {
    // Include descriptors past the end of the table
    FIRST_FILE..FIRST_FILE + MAX_OPEN + 2
}

#[derive(Clone, Debug)]
enum Transition {
    Creat(String),
    Open(String),
    Write(Fd, Vec<u8>),
    Read(Fd, usize),
    Close(Fd),
    Unlink(String),
}

/// What the last transition should have returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum Outcome {
    #[default]
    Nothing,
    Fd(Fd),
    Count(usize),
    Data(Vec<u8>),
    Done,
    Failed,
}

#[derive(Clone, Debug, Default)]
struct Model {
    /// Contents of every file ever created, indexed by creation order.
    files: Vec<Vec<u8>>,
    names: BTreeMap<String, usize>,
    /// Descriptor to file index and cursor.
    fds: BTreeMap<Fd, (usize, usize)>,
    outcome: Outcome,
}

impl Model {
    fn bind(&mut self, file: usize) -> Outcome {
        let fd = (FIRST_FILE..)
            .find(|fd| !self.fds.contains_key(fd))
            .expect("a descriptor must be free");
        self.fds.insert(fd, (file, 0));
        Outcome::Fd(fd)
    }

    /// Returns the number of blocks held by files that are named or open.
    fn used_blocks(&self) -> u64 {
        let mut live: Vec<_> = self.names.values().copied().collect();
        live.extend(self.fds.values().map(|&(file, _)| file));
        live.sort_unstable();
        live.dedup();
        live.iter()
            .map(|&file| (self.files[file].len() as u64).div_ceil(BLOCK_SIZE))
            .sum()
    }
}

struct KernelReference;

impl ReferenceStateMachine for KernelReference {
    type State = Model;

    type Transition = Transition;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Model::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            2 => arb_name().prop_map(Transition::Creat),
            2 => arb_name().prop_map(Transition::Open),
            4 => (arb_fd(), prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(fd, data)| Transition::Write(fd, data)),
            4 => (arb_fd(), 0..64usize).prop_map(|(fd, len)| Transition::Read(fd, len)),
            2 => arb_fd().prop_map(Transition::Close),
            1 => arb_name().prop_map(Transition::Unlink),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        state.outcome = match transition {
            Transition::Creat(_) | Transition::Open(_) if state.fds.len() == MAX_OPEN => {
                Outcome::Failed
            }
            Transition::Creat(name) => {
                let file = match state.names.get(name) {
                    Some(&file) => file,
                    None => {
                        state.files.push(Vec::new());
                        let file = state.files.len() - 1;
                        state.names.insert(name.clone(), file);
                        file
                    }
                };
                state.bind(file)
            }
            Transition::Open(name) => match state.names.get(name) {
                Some(&file) => state.bind(file),
                None => Outcome::Failed,
            },
            Transition::Write(fd, data) => match state.fds.get_mut(fd) {
                Some((file, cursor)) => {
                    let contents = &mut state.files[*file];
                    let end = *cursor + data.len();
                    if contents.len() < end {
                        contents.resize(end, 0);
                    }
                    contents[*cursor..end].copy_from_slice(data);
                    *cursor = end;
                    Outcome::Count(data.len())
                }
                None => Outcome::Failed,
            },
            Transition::Read(fd, len) => match state.fds.get_mut(fd) {
                Some((file, cursor)) => {
                    let contents = &state.files[*file];
                    let start = (*cursor).min(contents.len());
                    let end = (start + len).min(contents.len());
                    *cursor = end;
                    Outcome::Data(contents[start..end].to_vec())
                }
                None => Outcome::Failed,
            },
            Transition::Close(fd) => match state.fds.remove(fd) {
                Some(_) => Outcome::Done,
                None => Outcome::Failed,
            },
            Transition::Unlink(name) => match state.names.remove(name) {
                Some(_) => Outcome::Done,
                None => Outcome::Failed,
            },
        };
        state
    }
}

struct KernelState {
    kernel: Kernel<MemStorage>,
    process: Process<MemStorage>,
    available: u64,
}

impl StateMachineTest for KernelState {
    type SystemUnderTest = Self;

    type Reference = KernelReference;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        let kernel = new_kernel();
        let process = kernel.spawn();
        let available = available(&kernel);
        Self {
            kernel,
            process,
            available,
        }
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        let process = &mut state.process;
        let outcome = match transition {
            Transition::Creat(name) => process.creat(&name).map(Outcome::Fd),
            Transition::Open(name) => process.open(&name).map(Outcome::Fd),
            Transition::Write(fd, data) => process.write(fd, &data).map(Outcome::Count),
            Transition::Read(fd, len) => {
                let mut buf = vec![0u8; len];
                process.read(fd, &mut buf).map(|read| {
                    buf.truncate(read);
                    Outcome::Data(buf)
                })
            }
            Transition::Close(fd) => process.close(fd).map(|()| Outcome::Done),
            Transition::Unlink(name) => process.unlink(&name).map(|()| Outcome::Done),
        }
        .unwrap_or(Outcome::Failed);

        assert_eq!(outcome, ref_state.outcome);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        let kernel = &state.kernel;

        for fd in FIRST_FILE..FIRST_FILE + MAX_OPEN + 2 {
            let bound = state.process.descriptors().resolve(fd);
            let Some(&(file, cursor)) = ref_state.fds.get(&fd) else {
                assert!(bound.is_err(), "fd {fd} should be free");
                continue;
            };
            let Ok(Descriptor::File(id)) = bound else {
                panic!("fd {fd} should be bound");
            };

            let expected = &ref_state.files[file];
            let mut buf = vec![0u8; expected.len() + 1];
            let read = kernel.read_file_at(id, 0, &mut buf).unwrap();
            assert_eq!(&buf[..read], expected.as_slice());
            assert_eq!(kernel.file_offset(id).unwrap(), cursor as u64);
        }

        for name in NAMES {
            let contents = kernel.with_fs(|fs| {
                let id = fs.lookup(name).ok()?;
                let mut buf = vec![0u8; fs.stat(id).unwrap().size as usize];
                fs.read_at(id, 0, &mut buf).unwrap();
                Some(buf)
            });
            let expected = ref_state.names.get(name).map(|&file| &ref_state.files[file]);
            assert_eq!(contents.as_ref(), expected);
        }

        assert_eq!(
            available(kernel),
            state.available - ref_state.used_blocks()
        );
    }
}

prop_state_machine! {
    #[test]
    fn prop_state_machine(sequential 1..100 => KernelState);
}
