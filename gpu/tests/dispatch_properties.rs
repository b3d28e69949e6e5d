//! End-to-end dispatch behaviour on the software device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use lumen_gpu::kernels::DATA_SLOT;
use lumen_gpu::{
    logging, BackendKind, CompiledKernel, ComputeDispatcher, DataStager,
    DeviceLimits, DispatchError, Extent3, FixtureKernel, KernelLayout, SoftwareDevice, TokenStatus,
};

fn device() -> SoftwareDevice {
    logging::init_test();
    SoftwareDevice::new().unwrap()
}

fn run_fixture(kernel: FixtureKernel, input: &[f32], group: usize) -> Vec<f32> {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let group = Extent3::linear(group);
    let pipeline = dispatcher
        .build_pipeline(&kernel.compiled_for(BackendKind::Software, group))
        .unwrap();

    let data = stager.stage(input).unwrap();
    let count = stager.stage(&[input.len() as u32]).unwrap();
    let token = dispatcher
        .encode_and_submit(&pipeline, &[&data, &count], Extent3::linear(input.len()), group)
        .unwrap();
    assert_eq!(dispatcher.wait(&token), TokenStatus::Completed);
    assert!(!data.is_leased());
    stager.read::<f32>(&data).unwrap()
}

#[test]
fn test_identity_and_increment_transform_input() {
    let input: Vec<f32> = (0..300).map(|i| i as f32 * 0.5).collect();

    let identity = run_fixture(FixtureKernel::Identity, &input, 32);
    assert_eq!(identity, input);

    let incremented = run_fixture(FixtureKernel::AddOne, &input, 32);
    let expected: Vec<f32> = input.iter().map(|x| x + 1.0).collect();
    assert_eq!(incremented, expected);

    let scaled = run_fixture(FixtureKernel::Scale(-2.0), &input, 32);
    let expected: Vec<f32> = input.iter().map(|x| x * -2.0).collect();
    assert_eq!(scaled, expected);
}

#[test]
fn test_four_element_add_one() {
    let output = run_fixture(FixtureKernel::AddOne, &[1.0, 2.0, 3.0, 4.0], 4);
    assert_eq!(output, vec![2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_poll_after_terminal_is_stable() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let group = Extent3::linear(8);
    let ok = dispatcher
        .build_pipeline(&FixtureKernel::AddOne.host())
        .unwrap();
    let faulty = dispatcher
        .build_pipeline(&CompiledKernel::host(
            "always_fails",
            FixtureKernel::layout(),
            |_| Err("synthetic fault".to_string()),
        ))
        .unwrap();

    let data = stager.stage(&[0.0f32; 8]).unwrap();
    let count = stager.stage(&[8u32]).unwrap();

    let done = dispatcher
        .encode_and_submit(&ok, &[&data, &count], Extent3::linear(8), group)
        .unwrap();
    let terminal = dispatcher.wait(&done);
    assert_eq!(terminal, TokenStatus::Completed);
    for _ in 0..5 {
        assert_eq!(dispatcher.poll(&done), terminal);
    }

    let failed = dispatcher
        .encode_and_submit(&faulty, &[&data, &count], Extent3::linear(8), group)
        .unwrap();
    let terminal = dispatcher.wait(&failed);
    match &terminal {
        TokenStatus::Failed(fault) => {
            assert_eq!(fault.submission, failed.submission());
            assert!(fault.reason.contains("synthetic fault"), "{}", fault.reason);
        }
        other => panic!("expected a failed token, got {:?}", other),
    }
    for _ in 0..5 {
        assert_eq!(dispatcher.poll(&failed), terminal);
    }
    assert!(matches!(
        terminal.into_result(),
        Err(DispatchError::DeviceExecutionFailure { .. })
    ));
}

#[test]
fn test_submissions_complete_in_order() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let order = Arc::new(Mutex::new(Vec::new()));

    let tagged = |tag: &'static str, delay: Duration| {
        let order = Arc::clone(&order);
        CompiledKernel::host(tag, KernelLayout::new().read_write(0), move |inv| {
            if inv.linear_index() == 0 {
                std::thread::sleep(delay);
                order.lock().push(tag);
            }
            Ok(())
        })
    };
    let slow = dispatcher
        .build_pipeline(&tagged("a", Duration::from_millis(50)))
        .unwrap();
    let fast = dispatcher
        .build_pipeline(&tagged("b", Duration::ZERO))
        .unwrap();

    let first = stager.allocate(16).unwrap();
    let second = stager.allocate(16).unwrap();
    let group = Extent3::linear(1);
    let a = dispatcher
        .encode_and_submit(&slow, &[&first], Extent3::linear(1), group)
        .unwrap();
    let b = dispatcher
        .encode_and_submit(&fast, &[&second], Extent3::linear(1), group)
        .unwrap();
    assert!(a.submission() < b.submission());

    assert_eq!(dispatcher.wait(&b), TokenStatus::Completed);
    assert_eq!(dispatcher.poll(&a), TokenStatus::Completed);
    assert_eq!(*order.lock(), vec!["a", "b"]);
}

#[test]
fn test_uneven_grid_covers_every_element_once() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let invocations = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&invocations);
    let kernel = CompiledKernel::host(
        "count_visits",
        KernelLayout::new().read_write(0).read_only(1),
        move |inv| {
            seen.fetch_add(1, Ordering::Relaxed);
            let id = inv.thread_position_in_grid().width;
            let n = inv.load::<u32>(1, 0)? as usize;
            if id >= n {
                return Ok(());
            }
            let visits = inv.load::<u32>(0, id)?;
            inv.store(0, id, visits + 1)
        },
    );
    let pipeline = dispatcher.build_pipeline(&kernel).unwrap();

    let n = 1000;
    let mut visits = stager.allocate_for::<u32>(n).unwrap();
    stager.clear(&mut visits);
    let count = stager.stage(&[n as u32]).unwrap();

    let token = dispatcher
        .encode_and_submit(&pipeline, &[&visits, &count], Extent3::linear(n), Extent3::linear(64))
        .unwrap();
    assert_eq!(dispatcher.wait(&token), TokenStatus::Completed);

    // 16 groups of 64: the last group runs 24 tail threads.
    assert_eq!(invocations.load(Ordering::Relaxed), 16 * 64);
    let visits = stager.read::<u32>(&visits).unwrap();
    assert_eq!(visits.len(), n);
    assert!(visits.iter().all(|&v| v == 1));
}

#[test]
fn test_oversized_group_is_rejected_before_enqueue() {
    let limits = DeviceLimits {
        max_threads_per_group: 256,
        ..SoftwareDevice::DEFAULT_LIMITS
    };
    let device = device().with_limits(limits);
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let pipeline = dispatcher
        .build_pipeline(&FixtureKernel::AddOne.host())
        .unwrap();

    let data = stager.stage(&[0.0f32; 512]).unwrap();
    let count = stager.stage(&[512u32]).unwrap();

    for _ in 0..3 {
        let err = dispatcher
            .encode_and_submit(&pipeline, &[&data, &count], Extent3::linear(512), Extent3::linear(512))
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::InvalidDispatchConfiguration(_)));
    }
    assert_eq!(device.submissions(), 0);
    assert!(!data.is_leased());
    assert!(!count.is_leased());

    let token = dispatcher
        .encode_and_submit(&pipeline, &[&data, &count], Extent3::linear(512), Extent3::linear(256))
        .unwrap();
    assert_eq!(dispatcher.wait(&token), TokenStatus::Completed);
    assert_eq!(device.submissions(), 1);
}

#[test]
fn test_out_of_bounds_kernel_faults_and_queue_recovers() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);

    // Ignores the count binding, so tail threads run off the end.
    let unchecked = CompiledKernel::host("unchecked", FixtureKernel::layout(), |inv| {
        let id = inv.thread_position_in_grid().width;
        let value = inv.load::<f32>(DATA_SLOT, id)?;
        inv.store(DATA_SLOT, id, value + 1.0)
    });
    let unchecked = dispatcher.build_pipeline(&unchecked).unwrap();
    let checked = dispatcher
        .build_pipeline(&FixtureKernel::AddOne.host())
        .unwrap();

    let data = stager.stage(&[0.0f32; 10]).unwrap();
    let count = stager.stage(&[10u32]).unwrap();
    let group = Extent3::linear(4);

    // Separate buffers so the second dispatch queues behind the faulting one.
    let fresh = stager.stage(&[0.0f32; 10]).unwrap();
    let fresh_count = stager.stage(&[10u32]).unwrap();

    let bad = dispatcher
        .encode_and_submit(&unchecked, &[&data, &count], Extent3::linear(10), group)
        .unwrap();
    let good = dispatcher
        .encode_and_submit(&checked, &[&fresh, &fresh_count], Extent3::linear(10), group)
        .unwrap();
    match dispatcher.wait(&bad) {
        TokenStatus::Failed(fault) => {
            assert!(fault.reason.contains("out-of-bounds"), "{}", fault.reason)
        }
        other => panic!("expected a failed token, got {:?}", other),
    }
    assert_eq!(dispatcher.wait(&good), TokenStatus::Completed);
    assert!(!data.is_leased());
    assert!(!count.is_leased());
    assert_eq!(stager.read::<f32>(&fresh).unwrap(), vec![1.0f32; 10]);

    // Once the fault settles, the original buffers are usable again.
    let retry = dispatcher
        .encode_and_submit(&checked, &[&data, &count], Extent3::linear(10), group)
        .unwrap();
    assert_eq!(dispatcher.wait(&retry), TokenStatus::Completed);
}

#[test]
#[should_panic(expected = "host bind on a buffer lent")]
fn test_binding_pending_buffer_into_second_dispatch_panics() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let slow = CompiledKernel::host("slow", KernelLayout::new().read_write(0), |_| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    });
    let pipeline = dispatcher.build_pipeline(&slow).unwrap();
    let buffer = stager.stage(&[0.0f32]).unwrap();

    let one = Extent3::linear(1);
    let _first = dispatcher
        .encode_and_submit(&pipeline, &[&buffer], one, one)
        .unwrap();
    assert!(buffer.is_leased());
    let _second = dispatcher.encode_and_submit(&pipeline, &[&buffer], one, one);
}

#[test]
fn test_panicking_kernel_fails_its_token() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let kernel = CompiledKernel::host("panics", KernelLayout::new().read_write(0), |_| {
        panic!("kernel exploded")
    });
    let pipeline = dispatcher.build_pipeline(&kernel).unwrap();
    let buffer = stager.allocate(4).unwrap();

    let token = dispatcher
        .encode_and_submit(&pipeline, &[&buffer], Extent3::linear(1), Extent3::linear(1))
        .unwrap();
    match dispatcher.wait(&token) {
        TokenStatus::Failed(fault) => assert!(fault.reason.contains("kernel exploded")),
        other => panic!("expected a failed token, got {:?}", other),
    }
    assert!(!buffer.is_leased());
}

#[test]
#[should_panic(expected = "pending dispatch")]
fn test_write_while_leased_panics() {
    let device = device();
    let stager = DataStager::new(&device);
    let dispatcher = ComputeDispatcher::new(&device);
    let kernel = CompiledKernel::host("slow", KernelLayout::new().read_write(0), |_| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(())
    });
    let pipeline = dispatcher.build_pipeline(&kernel).unwrap();
    let mut buffer = stager.allocate_for::<f32>(1).unwrap();

    let _token = dispatcher
        .encode_and_submit(&pipeline, &[&buffer], Extent3::linear(1), Extent3::linear(1))
        .unwrap();
    stager.write(&mut buffer, &[1.0f32]);
}
