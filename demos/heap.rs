use std::{io::Read, ptr::NonNull};

use brkalloc::{GLOBAL, Sbrk};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb`, or just watch the program break move between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    Sbrk::program_break(),
  );
}

fn print_alloc(
  size: usize,
  address: NonNull<u8>,
) {
  let stats = GLOBAL.stats();
  println!(
    "Allocated {} bytes, address = {:?}, blocks = {}, program break = {:?}",
    size,
    address,
    stats.blocks,
    Sbrk::program_break(),
  );
}

fn print_chain() {
  let mut lines = Vec::new();
  // Collect first: the walk holds the heap lock, and printing allocates.
  let mut blocks = [(std::ptr::null_mut(), 0usize, false); 16];
  let mut count = 0;
  GLOBAL.walk(|block| {
    if count < blocks.len() {
      blocks[count] = (block.address, block.size, block.used);
    }
    count += 1;
  });
  for &(address, size, used) in blocks.iter().take(count) {
    lines.push(format!("  {:?} size = {:>6} used = {}", address, size, used));
  }
  println!("Chain ({} blocks):\n{}", count, lines.join("\n"));
}

fn main() {
  print_program_break("start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The heap is empty, so it has to grow.
  // --------------------------------------------------------------------
  let first = GLOBAL.allocate(4).unwrap().unwrap();
  println!("\n[1] Allocate u32");
  print_alloc(4, first);

  unsafe {
    first.cast::<u32>().write(0xDEADBEEF);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u32>().read());
  }
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes. The payload is rounded to 16 bytes when the
  //    heap grows, so the next header stays aligned.
  // --------------------------------------------------------------------
  let second = GLOBAL.allocate(12).unwrap().unwrap();
  println!("\n[2] Allocate [u8; 12]");
  print_alloc(12, second);
  unsafe { second.write_bytes(0xAB, 12) };
  println!(
    "[2] Distance from first payload = {} bytes",
    second.as_ptr() as usize - first.as_ptr() as usize
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block and ask for 2 bytes. First fit hands the
  //    released block out again, whole.
  // --------------------------------------------------------------------
  unsafe { GLOBAL.release(Some(first)) };
  println!("\n[3] Released first at {:?}", first);

  let third = GLOBAL.allocate(2).unwrap().unwrap();
  print_alloc(2, third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, the released block was reused"
    } else {
      "No, the heap grew (is BRKALLOC_RELEASE=retain set?)"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow the 12 byte block to 64 bytes. Its contents move to a new block.
  // --------------------------------------------------------------------
  let grown = unsafe { GLOBAL.resize(Some(second), 64) }.unwrap().unwrap();
  println!("\n[4] Resize second to 64 bytes: {:?} -> {:?}", second, grown);
  println!("[4] First byte after the move = 0x{:X}", unsafe { grown.read() });
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Allocate 64 KiB to watch the program break jump.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = GLOBAL.allocate(64 * 1024).unwrap().unwrap();
  println!("\n[5] Allocate large 64 KiB block");
  print_alloc(64 * 1024, big);
  print_program_break("after large alloc");
  block_until_enter_pressed();

  print_chain();

  // --------------------------------------------------------------------
  // 6) End of demo. The break never moves down; the OS reclaims everything
  //    when the process exits.
  // --------------------------------------------------------------------
  println!("\n[6] End of example. Process will exit and the OS will reclaim all memory.");
}
